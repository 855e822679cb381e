//! Commit selection and ordering.
//!
//! Range selectors are resolved once, up front, into committer-time bounds
//! and hash sets. Cheap predicates run on [`CommitStub`]s before a commit is
//! materialized; author and file-type predicates need the full [`Commit`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use strata_core::{Commit, CommitStub, MiningConfig, Order, Result};
use tracing::debug;

use crate::backend::VcsBackend;

/// Selection criteria resolved against one repository.
///
/// # Examples
///
/// ```
/// use strata_core::MiningConfig;
/// use strata_gitpulse::filter::CommitFilter;
/// use strata_gitpulse::memory::{CommitBuilder, MemoryBackend};
///
/// let mut repo = MemoryBackend::new("demo");
/// repo.push(CommitBuilder::new("a").timestamp(100).build());
/// repo.push(CommitBuilder::new("b").parents(&["a"]).timestamp(200).build());
///
/// let mut config = MiningConfig::default();
/// config.from_commit = Some("b".into());
/// let filter = CommitFilter::resolve(&config, &repo).unwrap();
/// assert_eq!(filter.since(), Some(200));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommitFilter {
    single: Option<String>,
    since: Option<i64>,
    until: Option<i64>,
    only_no_merge: bool,
    only_commits: Vec<String>,
    filepath_commits: Option<HashSet<String>>,
    tagged: Option<HashSet<String>>,
    only_authors: Vec<String>,
    file_types: Vec<String>,
}

impl CommitFilter {
    /// Resolve every selector of `config` against `backend`.
    ///
    /// Commit and tag bounds become the committer time of the commit they
    /// name; both bounds are inclusive.
    ///
    /// # Errors
    ///
    /// Returns an error if a named commit, tag or path history cannot be
    /// read from the backend.
    pub fn resolve<B: VcsBackend + ?Sized>(config: &MiningConfig, backend: &B) -> Result<Self> {
        let committer_time = |rev: &str| -> Result<i64> {
            Ok(backend.commit(rev)?.committer_date.timestamp())
        };

        let single = match &config.single {
            Some(rev) => Some(backend.commit(rev)?.hash),
            None => None,
        };

        let since = if let Some(date) = config.since {
            Some(date.timestamp())
        } else if let Some(rev) = &config.from_commit {
            Some(committer_time(rev)?)
        } else if let Some(tag) = &config.from_tag {
            Some(committer_time(&backend.resolve_tag(tag)?)?)
        } else {
            None
        };

        let until = if let Some(date) = config.to {
            Some(date.timestamp())
        } else if let Some(rev) = &config.to_commit {
            Some(committer_time(rev)?)
        } else if let Some(tag) = &config.to_tag {
            Some(committer_time(&backend.resolve_tag(tag)?)?)
        } else {
            None
        };

        let filepath_commits = match &config.filepath {
            Some(path) => Some(backend.commits_touching(path, config.include_deleted_files)?),
            None => None,
        };

        let tagged = if config.only_releases {
            Some(backend.tagged_commits()?.into_keys().collect())
        } else {
            None
        };

        debug!(?since, ?until, single = ?single, "resolved commit range");

        Ok(Self {
            single,
            since,
            until,
            only_no_merge: config.only_no_merge,
            only_commits: config.only_commits.clone(),
            filepath_commits,
            tagged,
            only_authors: config.only_authors.clone(),
            file_types: config.only_modifications_with_file_types.clone(),
        })
    }

    /// Inclusive lower committer-time bound, in seconds.
    pub fn since(&self) -> Option<i64> {
        self.since
    }

    /// Inclusive upper committer-time bound, in seconds.
    pub fn until(&self) -> Option<i64> {
        self.until
    }

    /// Whether any predicate needs the materialized commit.
    pub fn needs_commit(&self) -> bool {
        !self.only_authors.is_empty() || !self.file_types.is_empty()
    }

    /// Predicates decidable from the stub alone.
    pub fn accepts_stub(&self, stub: &CommitStub) -> bool {
        if let Some(single) = &self.single {
            return stub.hash == *single;
        }
        if self.since.is_some_and(|since| stub.committer_time < since) {
            return false;
        }
        if self.until.is_some_and(|until| stub.committer_time > until) {
            return false;
        }
        if self.only_no_merge && stub.parents.len() > 1 {
            return false;
        }
        if !self.only_commits.is_empty()
            && !self
                .only_commits
                .iter()
                .any(|wanted| !wanted.is_empty() && stub.hash.starts_with(wanted.as_str()))
        {
            return false;
        }
        if let Some(touching) = &self.filepath_commits {
            if !touching.contains(&stub.hash) {
                return false;
            }
        }
        if let Some(tagged) = &self.tagged {
            if !tagged.contains(&stub.hash) {
                return false;
            }
        }
        true
    }

    /// Predicates that need the materialized commit.
    pub fn accepts_commit(&self, commit: &Commit) -> bool {
        if !self.only_authors.is_empty() && !self.only_authors.contains(&commit.author.name) {
            debug!(hash = %commit.hash, author = %commit.author.name, "author not selected");
            return false;
        }
        if !self.file_types.is_empty() {
            let has_type = commit.modifications.iter().any(|m| {
                let filename = m.filename();
                self.file_types.iter().any(|ext| filename.ends_with(ext.as_str()))
            });
            if !has_type {
                debug!(hash = %commit.hash, "no modification with a selected file type");
                return false;
            }
        }
        true
    }
}

/// Arrange `stubs` (newest first, as listed by the backend) in `order`.
///
/// Without an order, commits come oldest first.
///
/// # Examples
///
/// ```
/// use strata_core::{CommitStub, Order};
/// use strata_gitpulse::filter::order_commits;
///
/// let stub = |hash: &str, parents: &[&str], time| CommitStub {
///     hash: hash.into(),
///     parents: parents.iter().map(|p| p.to_string()).collect(),
///     author_time: time,
///     committer_time: time,
/// };
/// let native = vec![stub("c", &["b"], 3), stub("b", &["a"], 2), stub("a", &[], 1)];
///
/// let oldest_first: Vec<_> = order_commits(native.clone(), None)
///     .into_iter()
///     .map(|s| s.hash)
///     .collect();
/// assert_eq!(oldest_first, ["a", "b", "c"]);
///
/// let newest_first: Vec<_> = order_commits(native, Some(Order::Reverse))
///     .into_iter()
///     .map(|s| s.hash)
///     .collect();
/// assert_eq!(newest_first, ["c", "b", "a"]);
/// ```
pub fn order_commits(mut stubs: Vec<CommitStub>, order: Option<Order>) -> Vec<CommitStub> {
    match order {
        Some(Order::Reverse) => stubs,
        None => {
            stubs.reverse();
            stubs
        }
        Some(Order::DateOrder) => {
            stubs.reverse();
            by_time(stubs, |s| s.committer_time)
        }
        Some(Order::AuthorDateOrder) => {
            stubs.reverse();
            by_time(stubs, |s| s.author_time)
        }
        Some(Order::TopoOrder) => {
            stubs.reverse();
            topological(stubs)
        }
    }
}

struct Graph {
    pending: Vec<usize>,
    children: Vec<Vec<usize>>,
}

impl Graph {
    /// Parent/child links among `stubs` only; parents outside the set are ignored.
    fn new(stubs: &[CommitStub]) -> Self {
        let position: HashMap<&str, usize> = stubs
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.hash.as_str(), idx))
            .collect();
        let mut pending = vec![0; stubs.len()];
        let mut children = vec![Vec::new(); stubs.len()];
        for (idx, stub) in stubs.iter().enumerate() {
            let mut seen = HashSet::new();
            for parent in &stub.parents {
                if let Some(&p) = position.get(parent.as_str()) {
                    if seen.insert(p) {
                        pending[idx] += 1;
                        children[p].push(idx);
                    }
                }
            }
        }
        Self { pending, children }
    }
}

/// Kahn's algorithm with the smallest `(time, position)` picked first.
fn by_time(stubs: Vec<CommitStub>, time: impl Fn(&CommitStub) -> i64) -> Vec<CommitStub> {
    let mut graph = Graph::new(&stubs);
    let mut ready: BinaryHeap<Reverse<(i64, usize)>> = graph
        .pending
        .iter()
        .enumerate()
        .filter(|(_, &count)| count == 0)
        .map(|(idx, _)| Reverse((time(&stubs[idx]), idx)))
        .collect();

    let mut sequence = Vec::with_capacity(stubs.len());
    while let Some(Reverse((_, idx))) = ready.pop() {
        sequence.push(idx);
        for &child in &graph.children[idx] {
            graph.pending[child] -= 1;
            if graph.pending[child] == 0 {
                ready.push(Reverse((time(&stubs[child]), child)));
            }
        }
    }
    take_in_sequence(stubs, &sequence)
}

/// Depth-first Kahn: a line of history is finished before another starts.
fn topological(stubs: Vec<CommitStub>) -> Vec<CommitStub> {
    let mut graph = Graph::new(&stubs);
    let key = |idx: usize| (stubs[idx].committer_time, idx);

    let mut stack: Vec<usize> = (0..stubs.len())
        .filter(|&idx| graph.pending[idx] == 0)
        .collect();
    stack.sort_by_key(|&idx| Reverse(key(idx)));

    let mut sequence = Vec::with_capacity(stubs.len());
    while let Some(idx) = stack.pop() {
        sequence.push(idx);
        let mut released: Vec<usize> = Vec::new();
        for &child in &graph.children[idx] {
            graph.pending[child] -= 1;
            if graph.pending[child] == 0 {
                released.push(child);
            }
        }
        released.sort_by_key(|&child| Reverse(key(child)));
        stack.extend(released);
    }
    take_in_sequence(stubs, &sequence)
}

fn take_in_sequence(stubs: Vec<CommitStub>, sequence: &[usize]) -> Vec<CommitStub> {
    let mut slots: Vec<Option<CommitStub>> = stubs.into_iter().map(Some).collect();
    sequence
        .iter()
        .filter_map(|&idx| slots.get_mut(idx).and_then(Option::take))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use strata_core::{ChangeKind, Developer, Modification};

    use super::*;
    use crate::memory::{CommitBuilder, MemoryBackend};

    fn stub(hash: &str, parents: &[&str], committer: i64, author: i64) -> CommitStub {
        CommitStub {
            hash: hash.into(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            author_time: author,
            committer_time: committer,
        }
    }

    fn hashes(stubs: Vec<CommitStub>) -> Vec<String> {
        stubs.into_iter().map(|s| s.hash).collect()
    }

    /// a -- b -- d (merge)
    ///  \-- c --/
    fn diamond() -> Vec<CommitStub> {
        vec![
            stub("d", &["b", "c"], 40, 40),
            stub("c", &["a"], 30, 10),
            stub("b", &["a"], 20, 25),
            stub("a", &[], 5, 5),
        ]
    }

    #[test]
    fn reverse_is_exact_inverse_of_default() {
        let native = vec![stub("c", &["b"], 3, 3), stub("b", &["a"], 2, 2), stub("a", &[], 1, 1)];
        let mut default = hashes(order_commits(native.clone(), None));
        let reverse = hashes(order_commits(native, Some(Order::Reverse)));
        default.reverse();
        assert_eq!(default, reverse);
    }

    #[test]
    fn author_date_order_uses_author_time() {
        let ordered = hashes(order_commits(diamond(), Some(Order::AuthorDateOrder)));
        assert_eq!(ordered, ["a", "c", "b", "d"]);
    }

    #[test]
    fn date_order_uses_committer_time() {
        let ordered = hashes(order_commits(diamond(), Some(Order::DateOrder)));
        assert_eq!(ordered, ["a", "b", "c", "d"]);
    }

    #[test]
    fn date_order_never_puts_child_before_parent() {
        // Child committed "before" its parent (clock skew).
        let native = vec![stub("child", &["parent"], 10, 10), stub("parent", &[], 50, 50)];
        let ordered = hashes(order_commits(native, Some(Order::DateOrder)));
        assert_eq!(ordered, ["parent", "child"]);
    }

    #[test]
    fn topo_order_finishes_a_line_before_switching() {
        // a -- b -- b2 -- m
        //  \-- c --------/
        let native = vec![
            stub("m", &["b2", "c"], 50, 50),
            stub("b2", &["b"], 40, 40),
            stub("c", &["a"], 25, 25),
            stub("b", &["a"], 20, 20),
            stub("a", &[], 10, 10),
        ];
        let ordered = hashes(order_commits(native, Some(Order::TopoOrder)));
        assert_eq!(ordered, ["a", "b", "b2", "c", "m"]);
    }

    #[test]
    fn parents_outside_the_set_are_ignored() {
        let native = vec![stub("y", &["x"], 2, 2), stub("z", &["gone"], 1, 1)];
        let ordered = hashes(order_commits(native, Some(Order::TopoOrder)));
        assert_eq!(ordered, ["z", "y"]);
    }

    fn history() -> MemoryBackend {
        let mut repo = MemoryBackend::new("filters");
        repo.push(
            CommitBuilder::new("a1")
                .timestamp(100)
                .author("alice", "alice@example.com")
                .add("src/main.rs", &["fn main() {}"])
                .build(),
        );
        repo.push(
            CommitBuilder::new("b2")
                .parents(&["a1"])
                .timestamp(200)
                .author("bob", "bob@example.com")
                .add("README.md", &["# demo"])
                .build(),
        );
        repo.push(
            CommitBuilder::new("c3")
                .parents(&["b2"])
                .timestamp(300)
                .author("alice", "alice@example.com")
                .modify("src/main.rs", "@@ -1 +1 @@\n-fn main() {}\n+fn main() { run() }\n")
                .build(),
        );
        repo.tag("v0.1", "b2");
        repo
    }

    fn selected(config: &MiningConfig, repo: &MemoryBackend) -> Vec<String> {
        let filter = CommitFilter::resolve(config, repo).unwrap();
        let stubs = repo.list_commits(&Default::default()).unwrap();
        order_commits(stubs, None)
            .into_iter()
            .filter(|s| filter.accepts_stub(s))
            .filter(|s| filter.accepts_commit(&repo.commit(&s.hash).unwrap()))
            .map(|s| s.hash)
            .collect()
    }

    #[test]
    fn commit_bounds_are_inclusive() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.from_commit = Some("b2".into());
        config.to_commit = Some("c3".into());
        assert_eq!(selected(&config, &repo), ["b2", "c3"]);
    }

    #[test]
    fn date_bounds_use_committer_date() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.to = Some(DateTime::parse_from_rfc3339("1970-01-01T00:03:20Z").unwrap());
        assert_eq!(selected(&config, &repo), ["a1", "b2"]);
    }

    #[test]
    fn tag_bounds_resolve_to_commits() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.from_tag = Some("v0.1".into());
        assert_eq!(selected(&config, &repo), ["b2", "c3"]);
    }

    #[test]
    fn single_selects_exactly_one() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.single = Some("b2".into());
        assert_eq!(selected(&config, &repo), ["b2"]);
    }

    #[test]
    fn authors_match_by_name() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.only_authors = vec!["alice".into()];
        assert_eq!(selected(&config, &repo), ["a1", "c3"]);
    }

    #[test]
    fn file_types_match_suffixes() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.only_modifications_with_file_types = vec![".md".into()];
        assert_eq!(selected(&config, &repo), ["b2"]);
    }

    #[test]
    fn releases_are_tagged_commits() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.only_releases = true;
        assert_eq!(selected(&config, &repo), ["b2"]);
    }

    #[test]
    fn filepath_keeps_touching_commits() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.filepath = Some("src/main.rs".into());
        assert_eq!(selected(&config, &repo), ["a1", "c3"]);
    }

    #[test]
    fn only_commits_accepts_prefixes() {
        let repo = history();
        let mut config = MiningConfig::default();
        config.only_commits = vec!["c".into(), "a1".into()];
        assert_eq!(selected(&config, &repo), ["a1", "c3"]);
    }

    #[test]
    fn merges_can_be_excluded() {
        let filter = CommitFilter {
            only_no_merge: true,
            ..CommitFilter::default()
        };
        assert!(!filter.accepts_stub(&stub("m", &["a", "b"], 1, 1)));
        assert!(filter.accepts_stub(&stub("n", &["a"], 1, 1)));
    }

    #[test]
    fn needs_commit_only_for_full_commit_predicates() {
        assert!(!CommitFilter::default().needs_commit());
        let filter = CommitFilter {
            file_types: vec![".rs".into()],
            ..CommitFilter::default()
        };
        assert!(filter.needs_commit());

        let date = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let mut commit = Commit::new("x", Developer::new("a", "a@x"), date);
        commit.modifications.push(Modification::new(
            Some("lib.rs".into()),
            None,
            ChangeKind::Deleted,
            "",
        ));
        assert!(filter.accepts_commit(&commit));
    }
}
