//! git2-backed [`VcsBackend`].
//!
//! Commits are listed with a time-sorted revwalk and materialized one at a
//! time: first-parent tree diffs with rename detection, per-file patches
//! rendered to unified text and parsed into line records. Merge commits carry
//! no modifications.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use git2::{
    BlameOptions, BranchType, Delta, Diff, DiffFindOptions, DiffOptions, Oid, Patch, Repository,
    Signature, Sort,
};
use strata_core::{
    ChangeKind, Commit, CommitStub, Developer, DiffAlgorithm, MiningConfig, Modification, Result,
    StrataError,
};
use strata_difflens::parser::parse_diff;
use tracing::debug;

use crate::backend::{BlameLine, VcsBackend, WalkScope};

/// Diff and identity settings of a [`GitBackend`].
///
/// # Examples
///
/// ```
/// use strata_core::{DiffAlgorithm, MiningConfig};
/// use strata_gitpulse::git::GitOptions;
///
/// let mut config = MiningConfig::for_repo(".");
/// config.skip_whitespaces = true;
/// let opts = GitOptions::from_config(&config);
/// assert!(opts.skip_whitespaces);
/// assert_eq!(opts.diff_algorithm, DiffAlgorithm::Myers);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GitOptions {
    /// Ignore whitespace-only changes in diffs.
    pub skip_whitespaces: bool,
    /// Line-diff algorithm.
    pub diff_algorithm: DiffAlgorithm,
    /// Map identities through `.mailmap`.
    pub use_mailmap: bool,
}

impl GitOptions {
    /// Options selected by `config`.
    pub fn from_config(config: &MiningConfig) -> Self {
        Self {
            skip_whitespaces: config.skip_whitespaces,
            diff_algorithm: config.diff_algorithm,
            use_mailmap: config.use_mailmap,
        }
    }
}

/// A repository opened through libgit2.
pub struct GitBackend {
    repo: Repository,
    path: PathBuf,
    options: GitOptions,
    tags: OnceCell<BTreeMap<String, String>>,
}

impl GitBackend {
    /// Open the repository at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Git`] if `path` is not a git repository.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use strata_gitpulse::backend::{VcsBackend, WalkScope};
    /// use strata_gitpulse::git::{GitBackend, GitOptions};
    ///
    /// let backend = GitBackend::open(Path::new("."), GitOptions::default()).unwrap();
    /// let stubs = backend.list_commits(&WalkScope::default()).unwrap();
    /// println!("{} commits", stubs.len());
    /// ```
    pub fn open(path: &Path, options: GitOptions) -> Result<Self> {
        let repo = Repository::open(path).map_err(|e| {
            StrataError::Git(format!(
                "failed to open repository {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
            options,
            tags: OnceCell::new(),
        })
    }

    /// Path the repository was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn find_commit(&self, rev: &str) -> Result<git2::Commit<'_>> {
        self.repo
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit())
            .map_err(|e| StrataError::Git(format!("failed to find commit {rev}: {e}")))
    }

    fn branch_tip(&self, name: &str) -> Result<Oid> {
        self.repo
            .resolve_reference_from_short_name(name)
            .and_then(|reference| reference.peel_to_commit())
            .map(|commit| commit.id())
            .map_err(|e| StrataError::Git(format!("failed to resolve branch '{name}': {e}")))
    }

    fn diff_options(&self) -> DiffOptions {
        let mut opts = DiffOptions::new();
        opts.ignore_whitespace(self.options.skip_whitespaces);
        match self.options.diff_algorithm {
            DiffAlgorithm::Myers => {}
            DiffAlgorithm::Minimal => {
                opts.minimal(true);
            }
            DiffAlgorithm::Patience => {
                opts.patience(true);
            }
        }
        opts
    }

    fn first_parent_diff(&self, commit: &git2::Commit<'_>) -> Result<Diff<'_>> {
        let commit_tree = commit
            .tree()
            .map_err(|e| StrataError::Git(format!("failed to get commit tree: {e}")))?;

        let parent_tree = if commit.parent_count() > 0 {
            let parent = commit
                .parent(0)
                .map_err(|e| StrataError::Git(format!("failed to get parent: {e}")))?;
            Some(
                parent
                    .tree()
                    .map_err(|e| StrataError::Git(format!("failed to get parent tree: {e}")))?,
            )
        } else {
            None
        };

        let mut diff_opts = self.diff_options();
        let mut diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), Some(&mut diff_opts))
            .map_err(|e| StrataError::Git(format!("failed to compute diff: {e}")))?;

        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        find_opts.ignore_whitespace(self.options.skip_whitespaces);
        diff.find_similar(Some(&mut find_opts))
            .map_err(|e| StrataError::Git(format!("failed to find renames: {e}")))?;

        Ok(diff)
    }

    fn modifications(&self, commit: &git2::Commit<'_>) -> Result<Vec<Modification>> {
        if commit.parent_count() > 1 {
            return Ok(Vec::new());
        }
        let diff = self.first_parent_diff(commit)?;

        let mut modifications = Vec::with_capacity(diff.deltas().len());
        for (idx, delta) in diff.deltas().enumerate() {
            let kind = change_kind(delta.status());
            let old_path = match kind {
                ChangeKind::Added => None,
                _ => delta.old_file().path().map(path_string),
            };
            let new_path = match kind {
                ChangeKind::Deleted => None,
                _ => delta.new_file().path().map(path_string),
            };
            if old_path.is_none() && new_path.is_none() {
                continue;
            }

            let text = match Patch::from_diff(&diff, idx) {
                Ok(Some(mut patch)) => {
                    let buf = patch
                        .to_buf()
                        .map_err(|e| StrataError::Git(format!("failed to render patch: {e}")))?;
                    hunks_only(&String::from_utf8_lossy(&buf))
                }
                Ok(None) => String::new(),
                Err(e) => return Err(StrataError::Git(format!("failed to build patch: {e}"))),
            };

            let mut modification = Modification::new(old_path, new_path, kind, text);
            modification.diff_parsed = parse_diff(&modification.diff);
            modifications.push(modification);
        }
        Ok(modifications)
    }

    fn identities(&self, commit: &git2::Commit<'_>) -> Result<(Developer, Developer)> {
        if self.options.use_mailmap {
            let mailmap = self
                .repo
                .mailmap()
                .map_err(|e| StrataError::Git(format!("failed to load mailmap: {e}")))?;
            let author = commit
                .author_with_mailmap(&mailmap)
                .map_err(|e| StrataError::Git(format!("failed to map author: {e}")))?;
            let committer = commit
                .committer_with_mailmap(&mailmap)
                .map_err(|e| StrataError::Git(format!("failed to map committer: {e}")))?;
            return Ok((developer(&author), developer(&committer)));
        }
        Ok((developer(&commit.author()), developer(&commit.committer())))
    }

    fn branches_containing(&self, oid: Oid) -> Result<BTreeSet<String>> {
        let branches = self
            .repo
            .branches(Some(BranchType::Local))
            .map_err(|e| StrataError::Git(format!("failed to list branches: {e}")))?;

        let mut names = BTreeSet::new();
        for entry in branches {
            let (branch, _) =
                entry.map_err(|e| StrataError::Git(format!("failed to read branch: {e}")))?;
            let Some(tip) = branch.get().target() else {
                continue;
            };
            let contains = tip == oid || self.repo.graph_descendant_of(tip, oid).unwrap_or(false);
            if contains {
                if let Ok(Some(name)) = branch.name() {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn main_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if !head.is_branch() {
            return None;
        }
        head.shorthand().map(str::to_string)
    }

    fn tag_map(&self) -> Result<&BTreeMap<String, String>> {
        if let Some(tags) = self.tags.get() {
            return Ok(tags);
        }
        let names = self
            .repo
            .tag_names(None)
            .map_err(|e| StrataError::Git(format!("failed to list tags: {e}")))?;

        let mut tags = BTreeMap::new();
        for name in names.iter().flatten() {
            let target = self
                .repo
                .revparse_single(&format!("refs/tags/{name}"))
                .and_then(|object| object.peel_to_commit());
            match target {
                Ok(commit) => {
                    tags.entry(commit.id().to_string())
                        .or_insert_with(|| name.to_string());
                }
                Err(e) => debug!(tag = name, error = %e, "tag does not point at a commit"),
            }
        }
        Ok(self.tags.get_or_init(|| tags))
    }

    fn head_has_path(&self, path: &str) -> bool {
        self.repo
            .head()
            .and_then(|head| head.peel_to_tree())
            .and_then(|tree| tree.get_path(Path::new(path)))
            .is_ok()
    }

    fn walk(&self, revwalk: git2::Revwalk<'_>) -> Result<Vec<git2::Commit<'_>>> {
        let mut commits = Vec::new();
        for oid_result in revwalk {
            let oid = oid_result.map_err(|e| StrataError::Git(format!("revwalk error: {e}")))?;
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|e| StrataError::Git(format!("failed to find commit: {e}")))?;
            commits.push(commit);
        }
        Ok(commits)
    }

    fn revwalk_from(&self, start: Option<Oid>) -> Result<git2::Revwalk<'_>> {
        let mut revwalk = self
            .repo
            .revwalk()
            .map_err(|e| StrataError::Git(format!("failed to create revwalk: {e}")))?;
        revwalk
            .set_sorting(Sort::TIME)
            .map_err(|e| StrataError::Git(format!("failed to sort revwalk: {e}")))?;
        match start {
            Some(oid) => revwalk
                .push(oid)
                .map_err(|e| StrataError::Git(format!("failed to push oid: {e}")))?,
            None => revwalk
                .push_head()
                .map_err(|e| StrataError::Git(format!("failed to push HEAD: {e}")))?,
        }
        Ok(revwalk)
    }
}

impl VcsBackend for GitBackend {
    fn project_name(&self) -> String {
        let root = self.repo.workdir().unwrap_or_else(|| self.repo.path());
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.strip_suffix(".git").map(str::to_string).unwrap_or(name)
    }

    fn list_commits(&self, scope: &WalkScope) -> Result<Vec<CommitStub>> {
        let start = scope
            .branch
            .as_deref()
            .map(|branch| self.branch_tip(branch))
            .transpose()?;
        let mut revwalk = self.revwalk_from(start)?;

        if scope.include_refs || scope.include_remotes {
            let references = self
                .repo
                .references()
                .map_err(|e| StrataError::Git(format!("failed to list references: {e}")))?;
            for reference in references {
                let reference = reference
                    .map_err(|e| StrataError::Git(format!("failed to read reference: {e}")))?;
                if reference.is_note() {
                    continue;
                }
                let wanted = if reference.is_remote() {
                    scope.include_remotes
                } else {
                    scope.include_refs
                };
                if !wanted {
                    continue;
                }
                if let Ok(commit) = reference.peel_to_commit() {
                    revwalk
                        .push(commit.id())
                        .map_err(|e| StrataError::Git(format!("failed to push oid: {e}")))?;
                }
            }
        }

        Ok(self.walk(revwalk)?.iter().map(stub).collect())
    }

    fn commit(&self, hash: &str) -> Result<Commit> {
        let raw = self.find_commit(hash)?;
        let id = raw.id();
        let hash = id.to_string();
        let (author, committer) = self.identities(&raw)?;
        let branches = self.branches_containing(id)?;
        let in_main_branch = self
            .main_branch()
            .is_some_and(|main| branches.contains(&main));
        let author_date = to_datetime(raw.author().when())?;
        let committer_date = to_datetime(raw.committer().when())?;
        let tag = self.tag_map()?.get(&hash).cloned();
        let modifications = self.modifications(&raw)?;

        Ok(Commit {
            parents: raw.parent_ids().map(|p| p.to_string()).collect(),
            author,
            author_date,
            committer,
            committer_date,
            message: String::from_utf8_lossy(raw.message_bytes()).trim().to_string(),
            branches,
            in_main_branch,
            tag,
            project_name: self.project_name(),
            modifications,
            hash,
        })
    }

    fn diff(&self, hash: &str, path: &str) -> Result<String> {
        let raw = self.find_commit(hash)?;
        Ok(self
            .modifications(&raw)?
            .into_iter()
            .find(|m| m.new_path.as_deref() == Some(path) || m.old_path.as_deref() == Some(path))
            .map(|m| m.diff)
            .unwrap_or_default())
    }

    fn blame_lines(
        &self,
        revision: &str,
        path: &str,
        lines: &[u32],
    ) -> Result<HashMap<u32, BlameLine>> {
        let (Some(&min), Some(&max)) = (lines.iter().min(), lines.iter().max()) else {
            return Ok(HashMap::new());
        };
        let newest = self.find_commit(revision)?.id();

        let mut opts = BlameOptions::new();
        opts.newest_commit(newest)
            .min_line(min as usize)
            .max_line(max as usize)
            .ignore_whitespace(true);
        let blame = self
            .repo
            .blame_file(Path::new(path), Some(&mut opts))
            .map_err(|e| {
                StrataError::Git(format!("failed to blame {path}:{min}-{max} at {revision}: {e}"))
            })?;

        let mut result = HashMap::with_capacity(lines.len());
        for &line in lines {
            let Some(hunk) = blame.get_line(line as usize) else {
                debug!(path, line, "no blame hunk for line");
                continue;
            };
            let origin_line =
                origin_line(hunk.orig_start_line(), hunk.final_start_line(), line);
            let origin_path = hunk.path().map(path_string).unwrap_or_else(|| path.to_string());
            result.insert(
                line,
                BlameLine {
                    commit: hunk.final_commit_id().to_string(),
                    line: origin_line,
                    path: origin_path,
                },
            );
        }
        Ok(result)
    }

    fn resolve_tag(&self, name: &str) -> Result<String> {
        self.repo
            .revparse_single(&format!("refs/tags/{name}"))
            .and_then(|object| object.peel_to_commit())
            .map(|commit| commit.id().to_string())
            .map_err(|e| StrataError::Git(format!("failed to resolve tag '{name}': {e}")))
    }

    fn resolve_branch(&self, name: &str) -> Result<HashSet<String>> {
        let tip = self.branch_tip(name)?;
        let revwalk = self.revwalk_from(Some(tip))?;
        Ok(self
            .walk(revwalk)?
            .iter()
            .map(|c| c.id().to_string())
            .collect())
    }

    fn tagged_commits(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.tag_map()?.clone())
    }

    fn commits_touching(&self, path: &str, include_deleted: bool) -> Result<HashSet<String>> {
        if !include_deleted && !self.head_has_path(path) {
            debug!(path, "path not present at HEAD");
            return Ok(HashSet::new());
        }

        let mut names: HashSet<String> = HashSet::from([path.to_string()]);
        let mut touching = HashSet::new();
        let revwalk = self.revwalk_from(None)?;
        for commit in self.walk(revwalk)? {
            if commit.parent_count() > 1 {
                continue;
            }
            let diff = self.first_parent_diff(&commit)?;
            let mut hit = false;
            let mut previous_names = Vec::new();
            for delta in diff.deltas() {
                let old = delta.old_file().path().map(path_string);
                let new = delta.new_file().path().map(path_string);
                let matches = |p: &Option<String>| p.as_ref().is_some_and(|p| names.contains(p));
                if matches(&new) || matches(&old) {
                    hit = true;
                    if delta.status() == Delta::Renamed {
                        previous_names.extend(old);
                    }
                }
            }
            if hit {
                touching.insert(commit.id().to_string());
            }
            names.extend(previous_names);
        }
        Ok(touching)
    }

    fn try_clone(&self) -> Result<Self> {
        Self::open(&self.path, self.options)
    }
}

fn stub(commit: &git2::Commit<'_>) -> CommitStub {
    CommitStub {
        hash: commit.id().to_string(),
        parents: commit.parent_ids().map(|p| p.to_string()).collect(),
        author_time: commit.author().when().seconds(),
        committer_time: commit.committer().when().seconds(),
    }
}

fn change_kind(status: Delta) -> ChangeKind {
    match status {
        Delta::Added => ChangeKind::Added,
        Delta::Deleted => ChangeKind::Deleted,
        Delta::Modified => ChangeKind::Modified,
        Delta::Renamed => ChangeKind::Renamed,
        Delta::Copied => ChangeKind::Copied,
        _ => ChangeKind::Unknown,
    }
}

fn developer(signature: &Signature<'_>) -> Developer {
    Developer::new(
        String::from_utf8_lossy(signature.name_bytes()),
        String::from_utf8_lossy(signature.email_bytes()),
    )
}

/// Line in the blamed commit matching `line` of a hunk that starts at
/// `final_start` now and started at `orig_start` there.
fn origin_line(orig_start: usize, final_start: usize, line: u32) -> u32 {
    let offset = (line as usize).saturating_sub(final_start);
    u32::try_from(orig_start.saturating_add(offset)).unwrap_or(u32::MAX)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn to_datetime(time: git2::Time) -> Result<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60).ok_or_else(|| {
        StrataError::Git(format!("invalid UTC offset: {} minutes", time.offset_minutes()))
    })?;
    DateTime::from_timestamp(time.seconds(), 0)
        .map(|utc| utc.with_timezone(&offset))
        .ok_or_else(|| StrataError::Git(format!("timestamp out of range: {}", time.seconds())))
}

/// Drop the `diff --git`/`index`/`---`/`+++` preamble of a rendered patch.
fn hunks_only(patch: &str) -> String {
    if patch.starts_with("@@") {
        return patch.to_string();
    }
    match patch.find("\n@@") {
        Some(idx) => patch[idx + 1..].to_string(),
        None => String::new(),
    }
}
