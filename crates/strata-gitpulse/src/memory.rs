//! In-memory [`VcsBackend`] seeded with constructed commit graphs.
//!
//! Blame is computed by replaying the parsed diffs of a file along first
//! parents, so provenance and metrics can be exercised without a git
//! repository on disk.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use strata_core::{ChangeKind, Commit, CommitStub, Developer, Modification, Result, StrataError};
use strata_difflens::parser::parse_diff;

use crate::backend::{BlameLine, VcsBackend, WalkScope};

const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Default)]
struct Store {
    name: String,
    commits: Vec<Commit>,
    index: HashMap<String, usize>,
    tags: BTreeMap<String, String>,
    branches: BTreeMap<String, String>,
    remotes: BTreeMap<String, String>,
    head: String,
}

/// A repository held entirely in memory.
///
/// # Examples
///
/// ```
/// use strata_gitpulse::backend::{VcsBackend, WalkScope};
/// use strata_gitpulse::memory::{CommitBuilder, MemoryBackend};
///
/// let mut repo = MemoryBackend::new("demo");
/// repo.push(CommitBuilder::new("a1").timestamp(10).add("f.txt", &["x"]).build());
/// repo.push(CommitBuilder::new("b2").parents(&["a1"]).timestamp(20).build());
///
/// let stubs = repo.list_commits(&WalkScope::default()).unwrap();
/// let hashes: Vec<_> = stubs.iter().map(|s| s.hash.as_str()).collect();
/// assert_eq!(hashes, ["b2", "a1"]);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: Arc<Store>,
}

impl MemoryBackend {
    /// Empty repository whose HEAD is the `main` branch.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            store: Arc::new(Store {
                name: name.into(),
                head: DEFAULT_BRANCH.to_string(),
                ..Store::default()
            }),
        }
    }

    /// Add a commit. The HEAD branch advances when the commit's first parent
    /// is its current tip.
    ///
    /// Modifications with diff text but no parsed records are parsed here.
    pub fn push(&mut self, mut commit: Commit) -> &mut Self {
        for modification in &mut commit.modifications {
            if modification.diff_parsed.is_empty() && !modification.diff.is_empty() {
                modification.diff_parsed = parse_diff(&modification.diff);
            }
        }
        let store = Arc::make_mut(&mut self.store);
        let head = store.head.clone();
        let advances = match store.branches.get(&head) {
            None => true,
            Some(tip) => commit.parents.first() == Some(tip),
        };
        if advances {
            store.branches.insert(head, commit.hash.clone());
        }
        store.index.insert(commit.hash.clone(), store.commits.len());
        store.commits.push(commit);
        self
    }

    /// Point a branch at `hash`.
    pub fn set_branch(&mut self, name: &str, hash: &str) -> &mut Self {
        Arc::make_mut(&mut self.store)
            .branches
            .insert(name.to_string(), hash.to_string());
        self
    }

    /// Point a remote-tracking reference at `hash`.
    pub fn set_remote(&mut self, name: &str, hash: &str) -> &mut Self {
        Arc::make_mut(&mut self.store)
            .remotes
            .insert(name.to_string(), hash.to_string());
        self
    }

    /// Make `name` the HEAD branch; later pushes advance it.
    pub fn checkout(&mut self, name: &str) -> &mut Self {
        Arc::make_mut(&mut self.store).head = name.to_string();
        self
    }

    /// Tag `hash` as `name`.
    pub fn tag(&mut self, name: &str, hash: &str) -> &mut Self {
        Arc::make_mut(&mut self.store)
            .tags
            .insert(name.to_string(), hash.to_string());
        self
    }

    fn get(&self, hash: &str) -> Result<&Commit> {
        if let Some(&idx) = self.store.index.get(hash) {
            return Ok(&self.store.commits[idx]);
        }
        let mut matches = self
            .store
            .commits
            .iter()
            .filter(|c| !hash.is_empty() && c.hash.starts_with(hash));
        match (matches.next(), matches.next()) {
            (Some(commit), None) => Ok(commit),
            (Some(_), Some(_)) => Err(StrataError::Git(format!("ambiguous revision {hash}"))),
            _ => Err(StrataError::Git(format!("unknown revision {hash}"))),
        }
    }

    fn reachable(&self, tips: &[&str]) -> Result<HashSet<String>> {
        let mut seen = HashSet::new();
        let mut stack: Vec<String> = Vec::new();
        for tip in tips {
            stack.push(self.get(tip)?.hash.clone());
        }
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash.clone()) {
                continue;
            }
            let commit = self.get(&hash)?;
            stack.extend(commit.parents.iter().cloned());
        }
        Ok(seen)
    }

    fn head_tip(&self) -> Result<&str> {
        self.store
            .branches
            .get(&self.store.head)
            .map(String::as_str)
            .ok_or_else(|| StrataError::Git("HEAD does not point at a commit".into()))
    }

    /// Newest-first ordering of a set of hashes, like a time-sorted revwalk.
    fn newest_first(&self, hashes: &HashSet<String>) -> Vec<&Commit> {
        let mut commits: Vec<(usize, &Commit)> = self
            .store
            .commits
            .iter()
            .enumerate()
            .filter(|(_, c)| hashes.contains(&c.hash))
            .collect();
        commits.sort_by(|(ia, a), (ib, b)| {
            b.committer_date
                .timestamp()
                .cmp(&a.committer_date.timestamp())
                .then(ib.cmp(ia))
        });
        commits.into_iter().map(|(_, c)| c).collect()
    }

    /// First-parent chain from `revision` back to the root, oldest first.
    fn first_parent_chain(&self, revision: &str) -> Result<Vec<&Commit>> {
        let mut chain = Vec::new();
        let mut current = Some(self.get(revision)?);
        while let Some(commit) = current {
            chain.push(commit);
            current = match commit.parents.first() {
                Some(parent) => Some(self.get(parent)?),
                None => None,
            };
        }
        chain.reverse();
        Ok(chain)
    }

    /// Line origins of `path` at `revision`: one `(commit, line, path)` per line.
    fn replay(&self, revision: &str, path: &str) -> Result<Option<Vec<BlameLine>>> {
        let chain = self.first_parent_chain(revision)?;

        // Walk backwards to learn the name the file had after each commit.
        let mut names = vec![String::new(); chain.len()];
        let mut name = path.to_string();
        for (idx, commit) in chain.iter().enumerate().rev() {
            names[idx] = name.clone();
            let renamed = commit.modifications.iter().find(|m| {
                m.change_kind == ChangeKind::Renamed && m.new_path.as_deref() == Some(name.as_str())
            });
            if let Some(old) = renamed.and_then(|m| m.old_path.clone()) {
                name = old;
            }
        }

        let mut table: Option<Vec<BlameLine>> = None;
        for (commit, name) in chain.iter().zip(&names) {
            let Some(modification) = commit
                .modifications
                .iter()
                .find(|m| m.path() == name.as_str())
            else {
                let moved_away = commit.modifications.iter().any(|m| {
                    m.change_kind == ChangeKind::Renamed
                        && m.old_path.as_deref() == Some(name.as_str())
                });
                if moved_away {
                    table = None;
                }
                continue;
            };
            table = match modification.change_kind {
                ChangeKind::Deleted => None,
                ChangeKind::Added => Some(apply(&[], modification, &commit.hash, name)),
                _ => Some(apply(
                    table.as_deref().unwrap_or_default(),
                    modification,
                    &commit.hash,
                    name,
                )),
            };
        }
        Ok(table)
    }

    fn exists_at_head(&self, path: &str) -> Result<bool> {
        let tip = self.head_tip()?.to_string();
        Ok(self.replay(&tip, path)?.is_some())
    }
}

fn apply(
    before: &[BlameLine],
    modification: &Modification,
    hash: &str,
    path: &str,
) -> Vec<BlameLine> {
    let parsed = &modification.diff_parsed;
    let deleted: HashSet<u32> = parsed.deleted.iter().map(|l| l.line_number).collect();
    let added: HashSet<u32> = parsed.added.iter().map(|l| l.line_number).collect();

    let mut kept = before
        .iter()
        .enumerate()
        .filter(|(idx, _)| !deleted.contains(&(*idx as u32 + 1)))
        .map(|(_, line)| line.clone());

    let total = before.len() - deleted.len().min(before.len()) + added.len();
    let mut after = Vec::with_capacity(total);
    for line in 1..=total as u32 {
        if added.contains(&line) {
            after.push(BlameLine {
                commit: hash.to_string(),
                line,
                path: path.to_string(),
            });
        } else if let Some(origin) = kept.next() {
            after.push(origin);
        }
    }
    after
}

impl VcsBackend for MemoryBackend {
    fn project_name(&self) -> String {
        self.store.name.clone()
    }

    fn list_commits(&self, scope: &WalkScope) -> Result<Vec<CommitStub>> {
        let mut tips: Vec<&str> = Vec::new();
        match &scope.branch {
            Some(branch) => tips.push(
                self.store
                    .branches
                    .get(branch)
                    .ok_or_else(|| StrataError::Git(format!("unknown branch '{branch}'")))?,
            ),
            None => {
                if self.store.commits.is_empty() {
                    return Ok(Vec::new());
                }
                tips.push(self.head_tip()?);
            }
        }
        if scope.include_refs {
            tips.extend(self.store.branches.values().map(String::as_str));
            tips.extend(self.store.tags.values().map(String::as_str));
        }
        if scope.include_remotes {
            tips.extend(self.store.remotes.values().map(String::as_str));
        }

        let reachable = self.reachable(&tips)?;
        Ok(self
            .newest_first(&reachable)
            .into_iter()
            .map(Commit::stub)
            .collect())
    }

    fn commit(&self, hash: &str) -> Result<Commit> {
        let mut commit = self.get(hash)?.clone();
        for (name, tip) in &self.store.branches {
            if self.reachable(&[tip.as_str()])?.contains(&commit.hash) {
                commit.branches.insert(name.clone());
            }
        }
        commit.in_main_branch = commit.branches.contains(&self.store.head);
        commit.tag = self
            .store
            .tags
            .iter()
            .find(|(_, target)| **target == commit.hash)
            .map(|(name, _)| name.clone());
        commit.project_name = self.store.name.clone();
        if commit.is_merge() {
            commit.modifications.clear();
        }
        Ok(commit)
    }

    fn diff(&self, hash: &str, path: &str) -> Result<String> {
        Ok(self
            .get(hash)?
            .modifications
            .iter()
            .find(|m| m.new_path.as_deref() == Some(path) || m.old_path.as_deref() == Some(path))
            .map(|m| m.diff.clone())
            .unwrap_or_default())
    }

    fn blame_lines(
        &self,
        revision: &str,
        path: &str,
        lines: &[u32],
    ) -> Result<HashMap<u32, BlameLine>> {
        let table = self.replay(revision, path)?.ok_or_else(|| {
            StrataError::Git(format!("path {path} does not exist at {revision}"))
        })?;
        Ok(lines
            .iter()
            .filter_map(|&line| {
                let origin = table.get((line as usize).checked_sub(1)?)?;
                Some((line, origin.clone()))
            })
            .collect())
    }

    fn resolve_tag(&self, name: &str) -> Result<String> {
        self.store
            .tags
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::Git(format!("failed to resolve tag '{name}'")))
    }

    fn resolve_branch(&self, name: &str) -> Result<HashSet<String>> {
        let tip = self
            .store
            .branches
            .get(name)
            .ok_or_else(|| StrataError::Git(format!("failed to resolve branch '{name}'")))?;
        self.reachable(&[tip.as_str()])
    }

    fn tagged_commits(&self) -> Result<BTreeMap<String, String>> {
        let mut tagged = BTreeMap::new();
        for (name, hash) in &self.store.tags {
            tagged.entry(hash.clone()).or_insert_with(|| name.clone());
        }
        Ok(tagged)
    }

    fn commits_touching(&self, path: &str, include_deleted: bool) -> Result<HashSet<String>> {
        if self.store.commits.is_empty() || (!include_deleted && !self.exists_at_head(path)?) {
            return Ok(HashSet::new());
        }
        let reachable = self.reachable(&[self.head_tip()?])?;
        let mut names = HashSet::from([path.to_string()]);
        let mut touching = HashSet::new();
        for commit in self.newest_first(&reachable) {
            if commit.is_merge() {
                continue;
            }
            let mut previous_names = Vec::new();
            for m in &commit.modifications {
                let hit = [&m.old_path, &m.new_path]
                    .into_iter()
                    .flatten()
                    .any(|p| names.contains(p));
                if hit {
                    touching.insert(commit.hash.clone());
                    if m.change_kind == ChangeKind::Renamed {
                        previous_names.extend(m.old_path.clone());
                    }
                }
            }
            names.extend(previous_names);
        }
        Ok(touching)
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(self.clone())
    }
}

/// Fluent constructor for commits fed to a [`MemoryBackend`].
///
/// # Examples
///
/// ```
/// use strata_core::ChangeKind;
/// use strata_gitpulse::memory::CommitBuilder;
///
/// let commit = CommitBuilder::new("abc")
///     .author("alice", "alice@example.com")
///     .add("a.py", &["print(1)", "print(2)"])
///     .build();
/// assert_eq!(commit.modifications[0].change_kind, ChangeKind::Added);
/// assert_eq!(commit.modifications[0].diff_parsed.added.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct CommitBuilder {
    commit: Commit,
}

impl CommitBuilder {
    /// A root commit by `dev <dev@example.com>` at the epoch.
    pub fn new(hash: &str) -> Self {
        Self {
            commit: Commit::new(
                hash,
                Developer::new("dev", "dev@example.com"),
                DateTime::<FixedOffset>::default(),
            ),
        }
    }

    /// Set the parent hashes.
    pub fn parents(mut self, parents: &[&str]) -> Self {
        self.commit.parents = parents.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Set author and committer.
    pub fn author(mut self, name: &str, email: &str) -> Self {
        self.commit.author = Developer::new(name, email);
        self.commit.committer = self.commit.author.clone();
        self
    }

    /// Set author and committer dates, in seconds since the epoch (UTC).
    pub fn timestamp(mut self, seconds: i64) -> Self {
        let date = DateTime::from_timestamp(seconds, 0)
            .unwrap_or_default()
            .fixed_offset();
        self.commit.author_date = date;
        self.commit.committer_date = date;
        self
    }

    /// Set the author date separately, in seconds since the epoch (UTC).
    pub fn authored_at(mut self, seconds: i64) -> Self {
        self.commit.author_date = DateTime::from_timestamp(seconds, 0)
            .unwrap_or_default()
            .fixed_offset();
        self
    }

    /// Set the message.
    pub fn message(mut self, message: &str) -> Self {
        self.commit.message = message.to_string();
        self
    }

    /// Add a new file holding `lines`.
    pub fn add(self, path: &str, lines: &[&str]) -> Self {
        let mut diff = format!("@@ -0,0 +1,{} @@\n", lines.len());
        for line in lines {
            diff.push('+');
            diff.push_str(line);
            diff.push('\n');
        }
        self.change(None, Some(path), ChangeKind::Added, &diff)
    }

    /// Delete a file that held `lines`.
    pub fn delete(self, path: &str, lines: &[&str]) -> Self {
        let mut diff = format!("@@ -1,{} +0,0 @@\n", lines.len());
        for line in lines {
            diff.push('-');
            diff.push_str(line);
            diff.push('\n');
        }
        self.change(Some(path), None, ChangeKind::Deleted, &diff)
    }

    /// Modify a file in place with a unified diff.
    pub fn modify(self, path: &str, diff: &str) -> Self {
        self.change(Some(path), Some(path), ChangeKind::Modified, diff)
    }

    /// Rename a file, optionally changing it with a unified diff.
    pub fn rename(self, old: &str, new: &str, diff: &str) -> Self {
        self.change(Some(old), Some(new), ChangeKind::Renamed, diff)
    }

    fn change(
        mut self,
        old: Option<&str>,
        new: Option<&str>,
        kind: ChangeKind,
        diff: &str,
    ) -> Self {
        let mut modification =
            Modification::new(old.map(str::to_string), new.map(str::to_string), kind, diff);
        modification.diff_parsed = parse_diff(diff);
        self.commit.modifications.push(modification);
        self
    }

    /// Finish the commit.
    pub fn build(self) -> Commit {
        self.commit
    }
}
