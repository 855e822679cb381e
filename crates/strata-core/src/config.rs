use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::StrataError;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = ".strata.toml";

/// Top-level configuration loaded from `.strata.toml`.
///
/// CLI flags override values read from the file.
///
/// # Examples
///
/// ```
/// use strata_core::StrataConfig;
///
/// let config = StrataConfig::default();
/// assert_eq!(config.mining.num_workers, 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Traversal, filtering and diff settings.
    #[serde(default)]
    pub mining: MiningConfig,
}

impl StrataConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Io`] if the file cannot be read, or
    /// [`StrataError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use strata_core::StrataConfig;
    /// use std::path::Path;
    ///
    /// let config = StrataConfig::from_file(Path::new(".strata.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, StrataError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::{Order, StrataConfig};
    ///
    /// let toml = r#"
    /// [mining]
    /// repos = ["."]
    /// order = "topo-order"
    /// "#;
    /// let config = StrataConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.mining.order, Some(Order::TopoOrder));
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, StrataError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Commit ordering applied by the traversal.
///
/// Without an explicit order commits are yielded oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Order {
    /// Committer date ascending, never a child before its parents.
    DateOrder,
    /// Author date ascending, never a child before its parents.
    AuthorDateOrder,
    /// Parents before children, one line of history at a time.
    TopoOrder,
    /// Newest first (the backend's native order).
    Reverse,
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date-order" | "date" => Ok(Order::DateOrder),
            "author-date-order" | "author-date" => Ok(Order::AuthorDateOrder),
            "topo-order" | "topo" => Ok(Order::TopoOrder),
            "reverse" => Ok(Order::Reverse),
            other => Err(format!("unknown order: {other}")),
        }
    }
}

/// Line-diff algorithm used when producing per-file diffs.
///
/// libgit2 offers no histogram algorithm, so the choices are limited to the
/// three it implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAlgorithm {
    /// Default Myers diff.
    #[default]
    Myers,
    /// Myers with extra effort to find the smallest diff.
    Minimal,
    /// Patience diff.
    Patience,
}

impl std::str::FromStr for DiffAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "myers" => Ok(DiffAlgorithm::Myers),
            "minimal" => Ok(DiffAlgorithm::Minimal),
            "patience" => Ok(DiffAlgorithm::Patience),
            other => Err(format!("unknown diff algorithm: {other}")),
        }
    }
}

/// Range selectors, filters and traversal options for one mining operation.
///
/// At most one of `since`, `from_commit`, `from_tag` and at most one of `to`,
/// `to_commit`, `to_tag` may be set, and `single` excludes all of them.
/// Call [`MiningConfig::validate`] before traversing.
///
/// # Examples
///
/// ```
/// use strata_core::MiningConfig;
///
/// let mut config = MiningConfig::for_repo("/tmp/project");
/// config.only_no_merge = true;
/// assert!(config.validate().is_ok());
///
/// config.single = Some("abc123".into());
/// config.from_tag = Some("v1.0".into());
/// assert!(config.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Local paths or remote URLs, analysed in order.
    pub repos: Vec<String>,
    /// Analyse only this commit.
    pub single: Option<String>,
    /// Inclusive lower committer-date bound.
    pub since: Option<DateTime<FixedOffset>>,
    /// Inclusive upper committer-date bound.
    pub to: Option<DateTime<FixedOffset>>,
    /// Start from this commit (inclusive).
    pub from_commit: Option<String>,
    /// Stop at this commit (inclusive).
    pub to_commit: Option<String>,
    /// Start from this tag (inclusive).
    pub from_tag: Option<String>,
    /// Stop at this tag (inclusive).
    pub to_tag: Option<String>,
    /// Walk from this branch instead of HEAD.
    pub only_in_branch: Option<String>,
    /// Skip merge commits.
    pub only_no_merge: bool,
    /// Keep commits whose author name is listed.
    pub only_authors: Vec<String>,
    /// Keep only the listed commit hashes.
    pub only_commits: Vec<String>,
    /// Keep only tagged commits.
    pub only_releases: bool,
    /// Keep commits that touched this path.
    pub filepath: Option<String>,
    /// With `filepath`, also keep commits after the path was deleted.
    pub include_deleted_files: bool,
    /// Keep commits that modified a file ending with one of these suffixes.
    pub only_modifications_with_file_types: Vec<String>,
    /// Ordering; `None` yields oldest first.
    pub order: Option<Order>,
    /// Worker threads; more than one makes ordering best-effort.
    pub num_workers: usize,
    /// Ignore whitespace when diffing.
    pub skip_whitespaces: bool,
    /// Line-diff algorithm.
    pub diff_algorithm: DiffAlgorithm,
    /// Directory receiving remote clones instead of a temporary one.
    pub clone_repo_to: Option<PathBuf>,
    /// Walk from every reference.
    pub include_refs: bool,
    /// Walk from remote-tracking references too.
    pub include_remotes: bool,
    /// Map identities through `.mailmap`.
    pub use_mailmap: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            single: None,
            since: None,
            to: None,
            from_commit: None,
            to_commit: None,
            from_tag: None,
            to_tag: None,
            only_in_branch: None,
            only_no_merge: false,
            only_authors: Vec::new(),
            only_commits: Vec::new(),
            only_releases: false,
            filepath: None,
            include_deleted_files: false,
            only_modifications_with_file_types: Vec::new(),
            order: None,
            num_workers: 1,
            skip_whitespaces: false,
            diff_algorithm: DiffAlgorithm::default(),
            clone_repo_to: None,
            include_refs: false,
            include_remotes: false,
            use_mailmap: false,
        }
    }
}

impl MiningConfig {
    /// Default configuration for a single repository.
    pub fn for_repo(repo: impl Into<String>) -> Self {
        Self {
            repos: vec![repo.into()],
            ..Self::default()
        }
    }

    fn from_selectors(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.since.is_some() {
            set.push("since");
        }
        if self.from_commit.is_some() {
            set.push("from_commit");
        }
        if self.from_tag.is_some() {
            set.push("from_tag");
        }
        set
    }

    fn to_selectors(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.to.is_some() {
            set.push("to");
        }
        if self.to_commit.is_some() {
            set.push("to_commit");
        }
        if self.to_tag.is_some() {
            set.push("to_tag");
        }
        set
    }

    /// Check selector exclusivity and option sanity before any traversal.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] when more than one FROM or TO selector
    /// is set, when `single` is combined with a range selector, when
    /// `num_workers` is zero, or when `clone_repo_to` is not an existing
    /// directory.
    pub fn validate(&self) -> Result<(), StrataError> {
        let from = self.from_selectors();
        if from.len() > 1 {
            return Err(StrataError::Config(format!(
                "only one of since, from_commit, from_tag may be set (got {})",
                from.join(", ")
            )));
        }
        let to = self.to_selectors();
        if to.len() > 1 {
            return Err(StrataError::Config(format!(
                "only one of to, to_commit, to_tag may be set (got {})",
                to.join(", ")
            )));
        }
        if self.single.is_some() && !(from.is_empty() && to.is_empty()) {
            let others: Vec<_> = from.into_iter().chain(to).collect();
            return Err(StrataError::Config(format!(
                "single cannot be combined with {}",
                others.join(", ")
            )));
        }

        if self.num_workers == 0 {
            return Err(StrataError::Config("num_workers must be at least 1".into()));
        }

        if let Some(dir) = &self.clone_repo_to {
            if !dir.is_dir() {
                return Err(StrataError::Config(format!(
                    "clone_repo_to is not an existing directory: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = MiningConfig::default();
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.diff_algorithm, DiffAlgorithm::Myers);
        assert!(config.order.is_none());
        assert!(!config.only_no_merge);
        assert!(config.repos.is_empty());
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = StrataConfig::from_toml("").unwrap();
        assert_eq!(config.mining, MiningConfig::default());
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[mining]
repos = ["/srv/repo", "https://github.com/org/tool.git"]
since = "2023-01-01T00:00:00Z"
to_commit = "deadbeef"
only_authors = ["alice"]
only_modifications_with_file_types = [".rs", ".toml"]
order = "author-date-order"
num_workers = 4
skip_whitespaces = true
diff_algorithm = "patience"
use_mailmap = true
"#;
        let config = StrataConfig::from_toml(toml).unwrap().mining;
        assert_eq!(config.repos.len(), 2);
        assert_eq!(config.since, Some(date("2023-01-01T00:00:00Z")));
        assert_eq!(config.to_commit.as_deref(), Some("deadbeef"));
        assert_eq!(config.only_authors, vec!["alice"]);
        assert_eq!(config.order, Some(Order::AuthorDateOrder));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.diff_algorithm, DiffAlgorithm::Patience);
        assert!(config.skip_whitespaces);
        assert!(config.use_mailmap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_toml_returns_error() {
        let err = StrataConfig::from_toml("{{invalid}}").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn unknown_order_is_rejected() {
        let toml = "[mining]\norder = \"sideways\"\n";
        assert!(StrataConfig::from_toml(toml).is_err());
    }

    #[test]
    fn two_from_selectors_fail() {
        let mut config = MiningConfig::for_repo(".");
        config.since = Some(date("2020-01-01T00:00:00Z"));
        config.from_tag = Some("v1".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("since, from_tag"));
    }

    #[test]
    fn two_to_selectors_fail() {
        let mut config = MiningConfig::for_repo(".");
        config.to_commit = Some("abc".into());
        config.to_tag = Some("v2".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn single_excludes_range_selectors() {
        let mut config = MiningConfig::for_repo(".");
        config.single = Some("abc".into());
        assert!(config.validate().is_ok());

        config.to = Some(date("2021-01-01T00:00:00Z"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("single cannot be combined with to"));
    }

    #[test]
    fn one_from_and_one_to_is_fine() {
        let mut config = MiningConfig::for_repo(".");
        config.from_commit = Some("a".into());
        config.to = Some(date("2021-01-01T00:00:00Z"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_fail() {
        let mut config = MiningConfig::for_repo(".");
        config.num_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn clone_dir_must_exist() {
        let mut config = MiningConfig::for_repo("https://example.com/r.git");
        config.clone_repo_to = Some(PathBuf::from("/definitely/not/here"));
        assert!(config.validate().is_err());

        config.clone_repo_to = Some(std::env::temp_dir());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn order_parses_short_names() {
        assert_eq!("topo".parse::<Order>().unwrap(), Order::TopoOrder);
        assert_eq!("reverse".parse::<Order>().unwrap(), Order::Reverse);
        assert!("random".parse::<Order>().is_err());
    }
}
