//! Line provenance: which earlier commits last touched the lines a commit
//! deletes or changes.
//!
//! This is the blame step of SZZ. Given a bug-fixing commit, every line it
//! removes is blamed at the fix's first parent; the commits found are the
//! candidates for having introduced the bug. Commits listed as transparent
//! (mass reformatting, license headers) are looked through: their lines are
//! mapped back across their own diff and blamed again one step earlier.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use strata_core::{ChangeKind, Commit, Modification, ParsedDiff};
use tracing::{debug, warn};

use crate::backend::VcsBackend;

/// Trimmed-line prefixes that mark a comment.
///
/// A bare `*` also matches C pointer dereferences (`*p = 0;`) and Python
/// continuation lines starting with `*args`; those are skipped as noise too.
const NOISE_PREFIXES: [&str; 6] = ["//", "#", "/*", "'''", "\"\"\"", "*"];

/// How the tracker treats noise and transparent commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceOptions {
    /// Ignore blank and comment lines, see [`is_noise`].
    pub skip_noise: bool,
    /// Commits to look through, by full hash or unique prefix.
    pub transparent: HashSet<String>,
    /// How many transparent commits one line may be carried through.
    pub max_depth: usize,
}

impl Default for ProvenanceOptions {
    fn default() -> Self {
        Self {
            skip_noise: true,
            transparent: HashSet::new(),
            max_depth: 16,
        }
    }
}

impl ProvenanceOptions {
    /// Default options looking through `hashes`.
    pub fn transparent<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transparent: hashes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn is_transparent(&self, hash: &str) -> bool {
        self.transparent
            .iter()
            .any(|t| !t.is_empty() && hash.starts_with(t.as_str()))
    }
}

/// Whether a line carries no code: blank or a comment.
///
/// Any line whose trimmed text starts with `*` counts as a comment, so
/// `*ptr = 0;` and `*args)` are noise as well.
///
/// # Examples
///
/// ```
/// use strata_gitpulse::provenance::is_noise;
///
/// assert!(is_noise("   "));
/// assert!(is_noise("    // explain"));
/// assert!(is_noise(" * continued doc"));
/// assert!(is_noise("*ptr = 0;"));
/// assert!(!is_noise("let x = 1; // trailing"));
/// ```
pub fn is_noise(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || NOISE_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Outcome of looking through a transparent commit.
enum Skip {
    /// Blame these lines of `path` at `revision` instead.
    Continue {
        revision: String,
        path: String,
        lines: Vec<u32>,
    },
    /// The commit cannot be looked through; it stays a candidate.
    Opaque,
}

/// Blames deleted lines back to the commits that introduced them.
///
/// # Examples
///
/// ```
/// use strata_gitpulse::memory::{CommitBuilder, MemoryBackend};
/// use strata_gitpulse::provenance::{ProvenanceOptions, ProvenanceTracker};
/// use strata_gitpulse::backend::VcsBackend;
///
/// let mut repo = MemoryBackend::new("demo");
/// repo.push(CommitBuilder::new("abc").add("a.py", &["x = 1", "y = 2"]).build());
/// repo.push(
///     CommitBuilder::new("fix")
///         .parents(&["abc"])
///         .modify("a.py", "@@ -1,2 +1,2 @@\n-x = 1\n+x = 3\n y = 2\n")
///         .build(),
/// );
///
/// let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
/// let fix = repo.commit("fix").unwrap();
/// let found = tracker.for_commit(&fix);
/// assert_eq!(found["a.py"].iter().collect::<Vec<_>>(), ["abc"]);
/// ```
pub struct ProvenanceTracker<'a, B: VcsBackend + ?Sized> {
    backend: &'a B,
    options: ProvenanceOptions,
}

impl<'a, B: VcsBackend + ?Sized> ProvenanceTracker<'a, B> {
    pub fn new(backend: &'a B, options: ProvenanceOptions) -> Self {
        Self { backend, options }
    }

    /// Candidate commits for every modification of `commit`.
    ///
    /// Keyed by the file's path after the commit, or its old path when the
    /// commit deleted it. Files with no candidates are left out.
    pub fn for_commit(&self, commit: &Commit) -> BTreeMap<String, BTreeSet<String>> {
        commit
            .modifications
            .iter()
            .filter_map(|m| {
                let found = self.for_modification(commit, m);
                (!found.is_empty()).then(|| (m.path().to_string(), found))
            })
            .collect()
    }

    /// Candidate commits for the lines `modification` deletes.
    ///
    /// An added file, a root commit and a file whose blame fails all yield
    /// an empty set.
    pub fn for_modification(
        &self,
        commit: &Commit,
        modification: &Modification,
    ) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        if modification.change_kind == ChangeKind::Added {
            return found;
        }
        let (Some(parent), Some(path)) = (commit.parents.first(), modification.source_path())
        else {
            return found;
        };

        let lines: Vec<u32> = modification
            .diff_parsed
            .deleted
            .iter()
            .filter(|l| !(self.options.skip_noise && is_noise(&l.content)))
            .map(|l| l.line_number)
            .collect();
        if lines.is_empty() {
            return found;
        }

        self.blame_into(parent, path, &lines, 0, &mut found);
        debug!(
            commit = %commit.hash,
            path,
            candidates = found.len(),
            "blamed deleted lines"
        );
        found
    }

    fn blame_into(
        &self,
        revision: &str,
        path: &str,
        lines: &[u32],
        depth: usize,
        found: &mut BTreeSet<String>,
    ) {
        let blamed = match self.backend.blame_lines(revision, path, lines) {
            Ok(blamed) => blamed,
            Err(e) => {
                warn!(revision, path, error = %e, "blame failed, skipping file");
                return;
            }
        };

        let mut deferred: BTreeMap<(String, String), Vec<u32>> = BTreeMap::new();
        for line in lines {
            let Some(origin) = blamed.get(line) else {
                debug!(revision, path, line, "line has no blame entry");
                continue;
            };
            if self.options.is_transparent(&origin.commit) {
                deferred
                    .entry((origin.commit.clone(), origin.path.clone()))
                    .or_default()
                    .push(origin.line);
            } else {
                found.insert(origin.commit.clone());
            }
        }

        for ((hash, origin_path), origin_lines) in deferred {
            if depth >= self.options.max_depth {
                debug!(commit = %hash, depth, "transparent chain too deep, keeping commit");
                found.insert(hash);
                continue;
            }
            match self.look_through(&hash, &origin_path, &origin_lines) {
                Skip::Continue {
                    revision,
                    path,
                    lines,
                } => {
                    if !lines.is_empty() {
                        self.blame_into(&revision, &path, &lines, depth + 1, found);
                    }
                }
                Skip::Opaque => {
                    found.insert(hash);
                }
            }
        }
    }

    /// Map `lines` of `path` as of transparent commit `hash` to its parent.
    fn look_through(&self, hash: &str, path: &str, lines: &[u32]) -> Skip {
        let commit = match self.backend.commit(hash) {
            Ok(commit) => commit,
            Err(e) => {
                warn!(commit = hash, error = %e, "cannot read transparent commit");
                return Skip::Opaque;
            }
        };
        let Some(modification) = commit
            .modifications
            .iter()
            .find(|m| m.new_path.as_deref() == Some(path))
        else {
            return Skip::Opaque;
        };
        let (Some(parent), Some(old_path)) = (commit.parents.first(), modification.source_path())
        else {
            // Everything in a root commit or a new file was added by it.
            return Skip::Continue {
                revision: String::new(),
                path: String::new(),
                lines: Vec::new(),
            };
        };
        let mapped: Vec<u32> = lines
            .iter()
            .filter_map(|&line| old_line(&modification.diff_parsed, line))
            .collect();
        Skip::Continue {
            revision: parent.clone(),
            path: old_path.to_string(),
            lines: mapped,
        }
    }
}

/// Line number before `diff` of the line numbered `new_line` after it.
///
/// An added line is paired with the deleted line at the same position in
/// its change block; a line with no deleted partner has no earlier line.
pub(crate) fn old_line(diff: &ParsedDiff, new_line: u32) -> Option<u32> {
    if let Some(block) = diff.blocks.iter().find(|block| block.adds(new_line)) {
        return block.replaced_line(new_line);
    }

    // Unchanged lines keep their rank among the lines the diff left alone.
    let added_before = diff
        .added
        .iter()
        .filter(|l| l.line_number < new_line)
        .count() as u32;
    let mut rank = new_line.checked_sub(added_before)?;
    let deleted: HashSet<u32> = diff.deleted.iter().map(|l| l.line_number).collect();
    let mut old = 0;
    while rank > 0 {
        old += 1;
        if !deleted.contains(&old) {
            rank -= 1;
        }
    }
    Some(old)
}

#[cfg(test)]
mod tests {
    use strata_difflens::parser::parse_diff;

    use super::*;
    use crate::memory::{CommitBuilder, MemoryBackend};

    fn history() -> MemoryBackend {
        let mut repo = MemoryBackend::new("szz");
        repo.push(CommitBuilder::new("abc").timestamp(1).add("file.py", &["a = 1"]).build());
        repo.push(
            CommitBuilder::new("def")
                .parents(&["abc"])
                .timestamp(2)
                .modify("file.py", "@@ -1 +1,2 @@\n a = 1\n+b = 2\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("ghi")
                .parents(&["def"])
                .timestamp(3)
                .modify("file.py", "@@ -1,2 +1,3 @@\n a = 1\n b = 2\n+c = 3\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("lmn")
                .parents(&["ghi"])
                .timestamp(4)
                .modify("file.py", "@@ -1,3 +1 @@\n-a = 1\n-b = 2\n c = 3\n")
                .build(),
        );
        repo
    }

    fn hashes(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn deleted_lines_trace_to_their_authors() {
        let repo = history();
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
        let lmn = repo.commit("lmn").unwrap();
        let found = tracker.for_modification(&lmn, &lmn.modifications[0]);
        assert_eq!(hashes(&found), ["abc", "def"]);
    }

    #[test]
    fn added_file_has_no_candidates() {
        let repo = history();
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
        let abc = repo.commit("abc").unwrap();
        assert!(tracker.for_commit(&abc).is_empty());
    }

    #[test]
    fn deleted_file_is_keyed_by_old_path() {
        let mut repo = history();
        repo.push(
            CommitBuilder::new("rm")
                .parents(&["lmn"])
                .timestamp(5)
                .delete("file.py", &["c = 3"])
                .build(),
        );
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
        let found = tracker.for_commit(&repo.commit("rm").unwrap());
        assert_eq!(hashes(&found["file.py"]), ["ghi"]);
    }

    #[test]
    fn renamed_file_is_blamed_at_old_path_and_keyed_by_new() {
        let mut repo = history();
        repo.push(
            CommitBuilder::new("mv")
                .parents(&["lmn"])
                .timestamp(5)
                .rename("file.py", "lib.py", "@@ -1 +1 @@\n-c = 3\n+c = 4\n")
                .build(),
        );
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
        let found = tracker.for_commit(&repo.commit("mv").unwrap());
        assert_eq!(found.keys().collect::<Vec<_>>(), ["lib.py"]);
        assert_eq!(hashes(&found["lib.py"]), ["ghi"]);
    }

    fn reformatted() -> MemoryBackend {
        let mut repo = MemoryBackend::new("fmt");
        repo.push(
            CommitBuilder::new("abc")
                .timestamp(1)
                .add("a.py", &["x = 1", "y = 2"])
                .build(),
        );
        repo.push(
            CommitBuilder::new("fmt")
                .parents(&["abc"])
                .timestamp(2)
                .modify("a.py", "@@ -1,2 +1,2 @@\n-x = 1\n+x=1\n y = 2\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("fix")
                .parents(&["fmt"])
                .timestamp(3)
                .modify("a.py", "@@ -1,2 +1,2 @@\n-x=1\n+x=5\n y = 2\n")
                .build(),
        );
        repo
    }

    #[test]
    fn reformatting_commit_is_a_candidate_by_default() {
        let repo = reformatted();
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
        let found = tracker.for_commit(&repo.commit("fix").unwrap());
        assert_eq!(hashes(&found["a.py"]), ["fmt"]);
    }

    #[test]
    fn transparent_commit_is_looked_through() {
        let repo = reformatted();
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::transparent(["fmt"]));
        let found = tracker.for_commit(&repo.commit("fix").unwrap());
        assert_eq!(hashes(&found["a.py"]), ["abc"]);
    }

    #[test]
    fn depth_limit_keeps_the_transparent_commit() {
        let repo = reformatted();
        let options = ProvenanceOptions {
            max_depth: 0,
            ..ProvenanceOptions::transparent(["fmt"])
        };
        let tracker = ProvenanceTracker::new(&repo, options);
        let found = tracker.for_commit(&repo.commit("fix").unwrap());
        assert_eq!(hashes(&found["a.py"]), ["fmt"]);
    }

    fn six_lines() -> MemoryBackend {
        let mut repo = MemoryBackend::new("ctx");
        repo.push(
            CommitBuilder::new("abc")
                .timestamp(1)
                .add("a.py", &["l1", "l2", "l3"])
                .build(),
        );
        repo.push(
            CommitBuilder::new("def")
                .parents(&["abc"])
                .timestamp(2)
                .modify("a.py", "@@ -1,3 +1,6 @@\n l1\n l2\n l3\n+l4\n+l5\n+l6\n")
                .build(),
        );
        repo
    }

    #[test]
    fn line_purely_added_by_transparent_commit_is_dropped() {
        let mut repo = MemoryBackend::new("pure");
        repo.push(CommitBuilder::new("abc").timestamp(1).add("a.py", &["a"]).build());
        repo.push(
            CommitBuilder::new("t")
                .parents(&["abc"])
                .timestamp(2)
                .modify("a.py", "@@ -1,0 +2 @@\n+z\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("fix")
                .parents(&["t"])
                .timestamp(3)
                .modify("a.py", "@@ -1,2 +1 @@\n a\n-z\n")
                .build(),
        );
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::transparent(["t"]));
        assert!(tracker.for_commit(&repo.commit("fix").unwrap()).is_empty());
    }

    #[test]
    fn insertion_inside_context_hunk_is_dropped() {
        let mut repo = six_lines();
        repo.push(
            CommitBuilder::new("t")
                .parents(&["def"])
                .timestamp(3)
                .modify("a.py", "@@ -1,6 +1,7 @@\n l1\n l2\n l3\n+X\n l4\n l5\n l6\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("fix")
                .parents(&["t"])
                .timestamp(4)
                .modify("a.py", "@@ -1,7 +1,6 @@\n l1\n l2\n l3\n-X\n l4\n l5\n l6\n")
                .build(),
        );
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::transparent(["t"]));
        assert!(tracker.for_commit(&repo.commit("fix").unwrap()).is_empty());
    }

    #[test]
    fn replacement_inside_context_hunk_is_looked_through() {
        let mut repo = six_lines();
        repo.push(
            CommitBuilder::new("t")
                .parents(&["def"])
                .timestamp(3)
                .modify("a.py", "@@ -2,5 +2,5 @@\n l2\n l3\n l4\n-l5\n+L5\n l6\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("fix")
                .parents(&["t"])
                .timestamp(4)
                .modify("a.py", "@@ -4,3 +4,3 @@\n l4\n-L5\n+l5 = 0\n l6\n")
                .build(),
        );
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::transparent(["t"]));
        let found = tracker.for_commit(&repo.commit("fix").unwrap());
        assert_eq!(hashes(&found["a.py"]), ["def"]);
    }

    #[test]
    fn comment_lines_are_skipped_unless_asked() {
        let mut repo = MemoryBackend::new("noise");
        repo.push(CommitBuilder::new("abc").timestamp(1).add("a.py", &["x = 1"]).build());
        repo.push(
            CommitBuilder::new("doc")
                .parents(&["abc"])
                .timestamp(2)
                .modify("a.py", "@@ -1 +1,2 @@\n+# comment\n x = 1\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("fix")
                .parents(&["doc"])
                .timestamp(3)
                .modify("a.py", "@@ -1,2 +1 @@\n-# comment\n-x = 1\n+x = 2\n")
                .build(),
        );
        let fix = repo.commit("fix").unwrap();

        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
        assert_eq!(hashes(&tracker.for_commit(&fix)["a.py"]), ["abc"]);

        let options = ProvenanceOptions {
            skip_noise: false,
            ..ProvenanceOptions::default()
        };
        let tracker = ProvenanceTracker::new(&repo, options);
        assert_eq!(hashes(&tracker.for_commit(&fix)["a.py"]), ["abc", "doc"]);
    }

    #[test]
    fn blame_failure_yields_nothing() {
        let repo = history();
        let mut lmn = repo.commit("lmn").unwrap();
        lmn.modifications[0].old_path = Some("missing.py".into());
        let tracker = ProvenanceTracker::new(&repo, ProvenanceOptions::default());
        assert!(tracker.for_commit(&lmn).is_empty());
    }

    #[test]
    fn old_line_maps_context_and_replacements() {
        let diff = parse_diff("@@ -1,4 +1,5 @@\n a\n-b\n+B\n c\n-d\n+e\n+f\n");
        // a
        assert_eq!(old_line(&diff, 1), Some(1));
        // B replaces b
        assert_eq!(old_line(&diff, 2), Some(2));
        // c
        assert_eq!(old_line(&diff, 3), Some(3));
        // e pairs with d, f has no deleted partner
        assert_eq!(old_line(&diff, 4), Some(4));
        assert_eq!(old_line(&diff, 5), None);
        // past the hunk
        assert_eq!(old_line(&diff, 6), Some(5));
    }

    #[test]
    fn old_line_ignores_leading_context() {
        let diff = parse_diff("@@ -1,6 +1,7 @@\n l1\n l2\n l3\n+X\n l4\n l5\n l6\n");
        assert_eq!(old_line(&diff, 3), Some(3));
        assert_eq!(old_line(&diff, 4), None);
        assert_eq!(old_line(&diff, 5), Some(4));
    }
}
