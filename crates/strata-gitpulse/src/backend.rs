//! Capability traits the mining pipeline consumes.
//!
//! The traversal, provenance and metrics code only ever talks to a
//! repository through [`VcsBackend`], so it runs unchanged against the git2
//! adapter in [`crate::git`] and the in-memory backend in [`crate::memory`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strata_core::{Commit, CommitStub, MethodMetrics, MiningConfig, Result};

/// Which references a commit listing starts from.
///
/// # Examples
///
/// ```
/// use strata_core::MiningConfig;
/// use strata_gitpulse::backend::WalkScope;
///
/// let mut config = MiningConfig::for_repo(".");
/// config.only_in_branch = Some("dev".into());
/// let scope = WalkScope::from_config(&config);
/// assert_eq!(scope.branch.as_deref(), Some("dev"));
/// assert!(!scope.include_refs);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkScope {
    /// Start from this branch instead of HEAD.
    pub branch: Option<String>,
    /// Also start from every local reference.
    pub include_refs: bool,
    /// Also start from remote-tracking references.
    pub include_remotes: bool,
}

impl WalkScope {
    /// Scope selected by the traversal options of `config`.
    pub fn from_config(config: &MiningConfig) -> Self {
        Self {
            branch: config.only_in_branch.clone(),
            include_refs: config.include_refs,
            include_remotes: config.include_remotes,
        }
    }
}

/// One line of a blame result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlameLine {
    /// Commit that last touched the line.
    pub commit: String,
    /// Line number of the line inside `commit`.
    pub line: u32,
    /// Path of the file inside `commit`.
    pub path: String,
}

/// Read-only access to a version-control repository.
///
/// Every read is addressed by revision; implementations never touch a
/// working directory.
pub trait VcsBackend: Send {
    /// Name of the repository, used as [`Commit::project_name`].
    fn project_name(&self) -> String;

    /// Every commit reachable from `scope`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the references cannot be resolved or walked.
    fn list_commits(&self, scope: &WalkScope) -> Result<Vec<CommitStub>>;

    /// Materialize one commit with its modifications and parsed diffs.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit does not exist or cannot be diffed.
    fn commit(&self, hash: &str) -> Result<Commit>;

    /// Unified-diff text of `path` in `hash` against its first parent.
    ///
    /// Returns an empty string when the commit did not touch `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit cannot be diffed.
    fn diff(&self, hash: &str, path: &str) -> Result<String>;

    /// Blame the given 1-based `lines` of `path` as of `revision`.
    ///
    /// Lines the backend cannot attribute are absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` does not exist at `revision`.
    fn blame_lines(
        &self,
        revision: &str,
        path: &str,
        lines: &[u32],
    ) -> Result<HashMap<u32, BlameLine>>;

    /// Hash of the commit a tag points at.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag does not exist.
    fn resolve_tag(&self, name: &str) -> Result<String>;

    /// Hashes of every commit reachable from a branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch does not exist.
    fn resolve_branch(&self, name: &str) -> Result<HashSet<String>>;

    /// Tagged commits, keyed by hash, with the tag name.
    ///
    /// # Errors
    ///
    /// Returns an error if the tags cannot be listed.
    fn tagged_commits(&self) -> Result<BTreeMap<String, String>>;

    /// Hashes of the commits that touched `path`, following renames backwards.
    ///
    /// Unless `include_deleted` is set, a path missing from HEAD yields
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if history cannot be walked.
    fn commits_touching(&self, path: &str, include_deleted: bool) -> Result<HashSet<String>>;

    /// An independent handle on the same repository, for another worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be reopened.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;
}

/// Per-language structural metrics.
///
/// An empty list means the language is not supported; it is a signal, not
/// an error.
pub trait MethodsProvider: Sync {
    /// Methods of `path` as of `revision`.
    fn methods(&self, path: &str, revision: &str) -> Vec<MethodMetrics>;
}

/// A provider that supports no language.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMethods;

impl MethodsProvider for NoMethods {
    fn methods(&self, _path: &str, _revision: &str) -> Vec<MethodMetrics> {
        Vec::new()
    }
}

impl<F> MethodsProvider for F
where
    F: Fn(&str, &str) -> Vec<MethodMetrics> + Sync,
{
    fn methods(&self, path: &str, revision: &str) -> Vec<MethodMetrics> {
        self(path, revision)
    }
}
