//! Attaching method metrics to commits and scoring them.

use strata_core::{ChangeKind, Commit};
use strata_difflens::dmm::DmmScores;
use tracing::debug;

use crate::backend::MethodsProvider;

/// Fill in `methods_before` and `methods` of every modification of `commit`.
///
/// The old side is read at the first parent and the new side at the commit
/// itself. A modification stays unsupported (both `None`) unless one of its
/// existing sides yields at least one method.
pub fn attach_methods<P: MethodsProvider + ?Sized>(commit: &mut Commit, provider: &P) {
    let parent = commit.parents.first().cloned();
    let hash = commit.hash.clone();
    for modification in &mut commit.modifications {
        let before = match (&parent, modification.source_path()) {
            (Some(parent), Some(path)) if modification.change_kind != ChangeKind::Added => {
                provider.methods(path, parent)
            }
            _ => Vec::new(),
        };
        let after = match &modification.new_path {
            Some(path) if modification.change_kind != ChangeKind::Deleted => {
                provider.methods(path, &hash)
            }
            _ => Vec::new(),
        };

        if before.is_empty() && after.is_empty() {
            debug!(path = modification.path(), "no method metrics, excluded from DMM");
            modification.methods_before = None;
            modification.methods = None;
        } else {
            modification.methods_before = Some(before);
            modification.methods = Some(after);
        }
    }
}

/// Attach method metrics from `provider` and score the commit.
///
/// # Examples
///
/// ```
/// use strata_core::MethodMetrics;
/// use strata_gitpulse::backend::VcsBackend;
/// use strata_gitpulse::dmm::enrich;
/// use strata_gitpulse::memory::{CommitBuilder, MemoryBackend};
///
/// let mut repo = MemoryBackend::new("demo");
/// repo.push(CommitBuilder::new("a").add("lib.rs", &["fn f() {}"]).build());
///
/// let provider = |_path: &str, _rev: &str| vec![MethodMetrics::new("f", 1, 1, 1, 0)];
/// let mut commit = repo.commit("a").unwrap();
/// let scores = enrich(&mut commit, &provider);
/// assert_eq!(scores.unit_size, Some(1.0));
/// ```
pub fn enrich<P: MethodsProvider + ?Sized>(commit: &mut Commit, provider: &P) -> DmmScores {
    attach_methods(commit, provider);
    DmmScores::for_commit(commit)
}

#[cfg(test)]
mod tests {
    use strata_core::MethodMetrics;

    use super::*;
    use crate::backend::{NoMethods, VcsBackend};
    use crate::memory::{CommitBuilder, MemoryBackend};

    /// Rust files only: a short method before `b`, a long complex one after.
    fn rust_only(path: &str, revision: &str) -> Vec<MethodMetrics> {
        if !path.ends_with(".rs") {
            return Vec::new();
        }
        match revision {
            "a" => vec![MethodMetrics::new("f", 1, 10, 1, 1)],
            _ => vec![MethodMetrics::new("f", 1, 40, 9, 4)],
        }
    }

    fn repo() -> MemoryBackend {
        let mut repo = MemoryBackend::new("dmm");
        repo.push(
            CommitBuilder::new("a")
                .timestamp(1)
                .add("lib.rs", &["fn f() {}"])
                .add("notes.txt", &["hi"])
                .build(),
        );
        repo.push(
            CommitBuilder::new("b")
                .parents(&["a"])
                .timestamp(2)
                .modify("lib.rs", "@@ -1 +1 @@\n-fn f() {}\n+fn f() { big() }\n")
                .modify("notes.txt", "@@ -1 +1 @@\n-hi\n+ho\n")
                .build(),
        );
        repo
    }

    #[test]
    fn unsupported_files_stay_unsupported() {
        let mut b = repo().commit("b").unwrap();
        attach_methods(&mut b, &rust_only);
        let notes = b.modifications.iter().find(|m| m.path() == "notes.txt").unwrap();
        assert!(!notes.language_supported());
        let lib = b.modifications.iter().find(|m| m.path() == "lib.rs").unwrap();
        assert!(lib.language_supported());
        assert_eq!(lib.methods_before.as_ref().unwrap()[0].nloc, 10);
    }

    #[test]
    fn added_file_has_empty_old_side() {
        let mut a = repo().commit("a").unwrap();
        attach_methods(&mut a, &rust_only);
        let lib = a.modifications.iter().find(|m| m.path() == "lib.rs").unwrap();
        assert_eq!(lib.methods_before.as_deref(), Some(&[][..]));
    }

    #[test]
    fn worsening_change_scores_zero() {
        let mut b = repo().commit("b").unwrap();
        let scores = enrich(&mut b, &rust_only);
        assert_eq!(scores.unit_size, Some(0.0));
        assert_eq!(scores.unit_complexity, Some(0.0));
        assert_eq!(scores.unit_interfacing, Some(0.0));
    }

    #[test]
    fn no_supported_language_is_not_applicable() {
        let mut b = repo().commit("b").unwrap();
        let scores = enrich(&mut b, &NoMethods);
        assert_eq!(scores, DmmScores::default());
        assert!(scores.unit_size.is_none());
    }
}
