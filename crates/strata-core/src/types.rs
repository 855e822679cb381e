use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A person who authored or committed a change.
///
/// # Examples
///
/// ```
/// use strata_core::Developer;
///
/// let dev = Developer::new("Alice", "alice@example.com");
/// assert_eq!(dev.to_string(), "Alice <alice@example.com>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Developer {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Developer {
    /// Create a developer identity.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Developer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// One added or deleted line of a diff.
///
/// Added lines are numbered in the new file, deleted lines in the old file.
///
/// # Examples
///
/// ```
/// use strata_core::LineRecord;
///
/// let line = LineRecord::new(3, "let x = 1;");
/// assert_eq!(line.line_number, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRecord {
    /// 1-based line number.
    pub line_number: u32,
    /// Line content without the `+`/`-` marker.
    pub content: String,
}

impl LineRecord {
    /// Create a line record.
    pub fn new(line_number: u32, content: impl Into<String>) -> Self {
        Self {
            line_number,
            content: content.into(),
        }
    }
}

/// A hunk header `@@ -old_start,old_lines +new_start,new_lines @@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunkHeader {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
}

/// A contiguous run of changed lines: deletions followed by additions.
///
/// `old_start` is the first deleted line in the old file and `new_start`
/// the first added line in the new file; both are the cursor positions where
/// the run begins, even when the run has no lines on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBlock {
    /// Old-file position of the block.
    pub old_start: u32,
    /// Lines deleted by the block.
    pub deleted: u32,
    /// New-file position of the block.
    pub new_start: u32,
    /// Lines added by the block.
    pub added: u32,
}

impl ChangeBlock {
    /// The old line an added line of this block replaced.
    ///
    /// The i-th added line pairs with the i-th deleted line. An added line
    /// outside the block, or past the block's deletions, replaced nothing.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::ChangeBlock;
    ///
    /// // `-b` `+B` `+C` at old line 2 / new line 2
    /// let block = ChangeBlock { old_start: 2, deleted: 1, new_start: 2, added: 2 };
    /// assert_eq!(block.replaced_line(2), Some(2));
    /// assert_eq!(block.replaced_line(3), None);
    /// assert_eq!(block.replaced_line(9), None);
    /// ```
    pub fn replaced_line(&self, new_line: u32) -> Option<u32> {
        let offset = new_line.checked_sub(self.new_start)?;
        if offset >= self.added || offset >= self.deleted {
            return None;
        }
        self.old_start.checked_add(offset)
    }

    /// Whether `new_line` is one of the lines this block added.
    pub fn adds(&self, new_line: u32) -> bool {
        new_line
            .checked_sub(self.new_start)
            .is_some_and(|offset| offset < self.added)
    }
}

/// Structured form of one file's unified diff.
///
/// # Examples
///
/// ```
/// use strata_core::ParsedDiff;
///
/// let parsed = ParsedDiff::default();
/// assert!(parsed.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDiff {
    /// Added lines in new-file order.
    pub added: Vec<LineRecord>,
    /// Deleted lines in old-file order.
    pub deleted: Vec<LineRecord>,
    /// Hunk headers that were parsed successfully.
    pub hunks: Vec<HunkHeader>,
    /// Contiguous runs of changed (`+`/`-`) lines, in diff order.
    pub blocks: Vec<ChangeBlock>,
}

impl ParsedDiff {
    /// Whether the diff produced no line records.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }
}

/// Kind of change a modification applies to a file.
///
/// # Examples
///
/// ```
/// use strata_core::ChangeKind;
///
/// assert_eq!(ChangeKind::Renamed.to_string(), "renamed");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// New file.
    Added,
    /// File copied from another path.
    Copied,
    /// File removed.
    Deleted,
    /// Existing file modified in place.
    Modified,
    /// File moved to another path.
    Renamed,
    /// Any status the backend could not classify.
    Unknown,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Added => "added",
            ChangeKind::Copied => "copied",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Structural metrics of one method, as reported by a metrics provider.
///
/// # Examples
///
/// ```
/// use strata_core::MethodMetrics;
///
/// let m = MethodMetrics::new("parse", 10, 29, 4, 2);
/// assert_eq!(m.nloc, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodMetrics {
    /// Method name.
    pub name: String,
    /// First line of the method.
    pub start_line: u32,
    /// Last line of the method (inclusive).
    pub end_line: u32,
    /// Lines of code; defaults to the inclusive line span.
    pub nloc: u32,
    /// Cyclomatic complexity.
    pub cyclomatic_complexity: u32,
    /// Number of parameters.
    pub parameter_count: u32,
}

impl MethodMetrics {
    /// Create method metrics whose `nloc` is the inclusive span `start..=end`.
    pub fn new(
        name: impl Into<String>,
        start_line: u32,
        end_line: u32,
        cyclomatic_complexity: u32,
        parameter_count: u32,
    ) -> Self {
        Self {
            name: name.into(),
            start_line,
            end_line,
            nloc: end_line.saturating_add(1).saturating_sub(start_line),
            cyclomatic_complexity,
            parameter_count,
        }
    }

    /// Override the lines-of-code count.
    pub fn with_nloc(mut self, nloc: u32) -> Self {
        self.nloc = nloc;
        self
    }
}

/// A file changed by a commit.
///
/// # Examples
///
/// ```
/// use strata_core::{ChangeKind, Modification};
///
/// let m = Modification::new(None, Some("src/lib.rs".into()), ChangeKind::Added, "");
/// assert_eq!(m.path(), "src/lib.rs");
/// assert_eq!(m.filename(), "lib.rs");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    /// Path before the change; `None` for added files.
    pub old_path: Option<String>,
    /// Path after the change; `None` for deleted files.
    pub new_path: Option<String>,
    /// Kind of change.
    pub change_kind: ChangeKind,
    /// Raw unified diff text for this file.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub diff: String,
    /// Added/deleted line records parsed from `diff`.
    #[serde(default)]
    pub diff_parsed: ParsedDiff,
    /// Methods of the file before the change, when the language is supported.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub methods_before: Option<Vec<MethodMetrics>>,
    /// Methods of the file after the change, when the language is supported.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub methods: Option<Vec<MethodMetrics>>,
}

impl Modification {
    /// Create a modification with an unparsed diff and no method metrics.
    pub fn new(
        old_path: Option<String>,
        new_path: Option<String>,
        change_kind: ChangeKind,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            old_path,
            new_path,
            change_kind,
            diff: diff.into(),
            diff_parsed: ParsedDiff::default(),
            methods_before: None,
            methods: None,
        }
    }

    /// The current path of the file: the new path, or the old one for deletions.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }

    /// The path the file had in the parent revision, if it existed there.
    pub fn source_path(&self) -> Option<&str> {
        match self.change_kind {
            ChangeKind::Added => None,
            _ => self.old_path.as_deref().or(self.new_path.as_deref()),
        }
    }

    /// Last component of [`Modification::path`].
    pub fn filename(&self) -> &str {
        let path = self.path();
        Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
    }

    /// Number of added lines.
    pub fn added_lines(&self) -> u64 {
        self.diff_parsed.added.len() as u64
    }

    /// Number of deleted lines.
    pub fn deleted_lines(&self) -> u64 {
        self.diff_parsed.deleted.len() as u64
    }

    /// Number of contiguous changed blocks in the diff.
    pub fn hunk_count(&self) -> u32 {
        u32::try_from(self.diff_parsed.blocks.len()).unwrap_or(u32::MAX)
    }

    /// Whether method metrics are available for both sides of the change.
    pub fn language_supported(&self) -> bool {
        self.methods_before.is_some() && self.methods.is_some()
    }

    /// Methods the diff touched.
    ///
    /// A method after the change is touched when an added line falls inside
    /// it, a method before the change when a deleted line does. Old methods
    /// whose name already appears among the new ones are not repeated.
    /// Empty when no method metrics are attached.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::{ChangeKind, LineRecord, MethodMetrics, Modification};
    ///
    /// let mut m = Modification::new(Some("a.rs".into()), Some("a.rs".into()), ChangeKind::Modified, "");
    /// m.diff_parsed.added.push(LineRecord::new(12, "    total += 1;"));
    /// m.methods_before = Some(vec![MethodMetrics::new("sum", 10, 14, 2, 1)]);
    /// m.methods = Some(vec![
    ///     MethodMetrics::new("sum", 10, 15, 2, 1),
    ///     MethodMetrics::new("mean", 17, 20, 1, 1),
    /// ]);
    /// let names: Vec<_> = m.changed_methods().iter().map(|m| m.name.as_str()).collect();
    /// assert_eq!(names, ["sum"]);
    /// ```
    pub fn changed_methods(&self) -> Vec<&MethodMetrics> {
        let mut changed = touched_methods(self.methods.as_deref(), &self.diff_parsed.added);
        for old in touched_methods(self.methods_before.as_deref(), &self.diff_parsed.deleted) {
            if !changed.iter().any(|m| m.name == old.name) {
                changed.push(old);
            }
        }
        changed
    }
}

fn touched_methods<'m>(
    methods: Option<&'m [MethodMetrics]>,
    lines: &[LineRecord],
) -> Vec<&'m MethodMetrics> {
    methods
        .unwrap_or_default()
        .iter()
        .filter(|method| {
            lines
                .iter()
                .any(|l| (method.start_line..=method.end_line).contains(&l.line_number))
        })
        .collect()
}

/// Lightweight commit descriptor listed before any commit is materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitStub {
    /// Full commit hash.
    pub hash: String,
    /// Parent hashes, first parent first.
    pub parents: Vec<String>,
    /// Author time in seconds since the epoch.
    pub author_time: i64,
    /// Committer time in seconds since the epoch.
    pub committer_time: i64,
}

/// A commit materialized from the backend.
///
/// # Examples
///
/// ```
/// use chrono::DateTime;
/// use strata_core::{Commit, Developer};
///
/// let date = DateTime::parse_from_rfc3339("2024-01-02T10:00:00+01:00").unwrap();
/// let commit = Commit::new("abc", Developer::new("alice", "a@x.io"), date);
/// assert!(!commit.is_merge());
/// assert_eq!(commit.author_timezone(), 3600);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Full commit hash.
    pub hash: String,
    /// Parent hashes, first parent first.
    pub parents: Vec<String>,
    /// Author identity.
    pub author: Developer,
    /// Author date with its original UTC offset.
    pub author_date: DateTime<FixedOffset>,
    /// Committer identity.
    pub committer: Developer,
    /// Committer date with its original UTC offset.
    pub committer_date: DateTime<FixedOffset>,
    /// Full commit message, trimmed.
    pub message: String,
    /// Local branches containing this commit.
    pub branches: BTreeSet<String>,
    /// Whether the repository's main branch contains this commit.
    pub in_main_branch: bool,
    /// Tag pointing at this commit, if any.
    pub tag: Option<String>,
    /// Name of the repository directory.
    pub project_name: String,
    /// Changed files in backend order.
    pub modifications: Vec<Modification>,
}

impl Commit {
    /// Create a root commit authored and committed by `author` at `date`.
    pub fn new(hash: impl Into<String>, author: Developer, date: DateTime<FixedOffset>) -> Self {
        Self {
            hash: hash.into(),
            parents: Vec::new(),
            committer: author.clone(),
            author,
            author_date: date,
            committer_date: date,
            message: String::new(),
            branches: BTreeSet::new(),
            in_main_branch: false,
            tag: None,
            project_name: String::new(),
            modifications: Vec::new(),
        }
    }

    /// Whether the commit has more than one parent.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Total added lines across all modifications.
    pub fn insertions(&self) -> u64 {
        self.modifications.iter().map(Modification::added_lines).sum()
    }

    /// Total deleted lines across all modifications.
    pub fn deletions(&self) -> u64 {
        self.modifications
            .iter()
            .map(Modification::deleted_lines)
            .sum()
    }

    /// Number of changed files.
    pub fn files(&self) -> usize {
        self.modifications.len()
    }

    /// Author UTC offset in seconds east of UTC.
    pub fn author_timezone(&self) -> i32 {
        self.author_date.offset().local_minus_utc()
    }

    /// Committer UTC offset in seconds east of UTC.
    pub fn committer_timezone(&self) -> i32 {
        self.committer_date.offset().local_minus_utc()
    }

    /// The lightweight descriptor of this commit.
    pub fn stub(&self) -> CommitStub {
        CommitStub {
            hash: self.hash.clone(),
            parents: self.parents.clone(),
            author_time: self.author_date.timestamp(),
            committer_time: self.committer_date.timestamp(),
        }
    }
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use strata_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable tables and summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn modification(added: &[u32], deleted: &[u32]) -> Modification {
        let mut m = Modification::new(
            Some("a.rs".into()),
            Some("a.rs".into()),
            ChangeKind::Modified,
            "",
        );
        m.diff_parsed.added = added.iter().map(|n| LineRecord::new(*n, "x")).collect();
        m.diff_parsed.deleted = deleted.iter().map(|n| LineRecord::new(*n, "y")).collect();
        m
    }

    #[test]
    fn commit_aggregates_line_stats() {
        let mut commit = Commit::new(
            "abc",
            Developer::new("alice", "alice@example.com"),
            date("2024-03-01T12:00:00Z"),
        );
        commit.modifications = vec![modification(&[1, 2, 3], &[4]), modification(&[9], &[])];
        assert_eq!(commit.insertions(), 4);
        assert_eq!(commit.deletions(), 1);
        assert_eq!(commit.files(), 2);
    }

    #[test]
    fn merge_means_two_or_more_parents() {
        let mut commit = Commit::new(
            "m",
            Developer::new("bob", "bob@example.com"),
            date("2024-03-01T12:00:00Z"),
        );
        commit.parents = vec!["a".into()];
        assert!(!commit.is_merge());
        commit.parents.push("b".into());
        assert!(commit.is_merge());
    }

    #[test]
    fn timezone_is_seconds_east_of_utc() {
        let commit = Commit::new(
            "abc",
            Developer::new("carol", "carol@example.com"),
            date("2024-03-01T12:00:00-05:00"),
        );
        assert_eq!(commit.author_timezone(), -5 * 3600);
        assert_eq!(commit.committer_timezone(), -5 * 3600);
    }

    #[test]
    fn deleted_file_path_falls_back_to_old_path() {
        let m = Modification::new(Some("gone/old.py".into()), None, ChangeKind::Deleted, "");
        assert_eq!(m.path(), "gone/old.py");
        assert_eq!(m.filename(), "old.py");
        assert_eq!(m.source_path(), Some("gone/old.py"));
    }

    #[test]
    fn added_file_has_no_source_path() {
        let m = Modification::new(None, Some("new.rs".into()), ChangeKind::Added, "");
        assert_eq!(m.source_path(), None);
        assert!(!m.language_supported());
    }

    #[test]
    fn block_pairs_additions_with_deletions() {
        // `-x` `+X` `+Y` starting at old line 4, new line 5
        let block = ChangeBlock {
            old_start: 4,
            deleted: 1,
            new_start: 5,
            added: 2,
        };
        assert_eq!(block.replaced_line(5), Some(4));
        assert_eq!(block.replaced_line(6), None);
        assert_eq!(block.replaced_line(4), None);
        assert!(block.adds(6));
        assert!(!block.adds(7));
    }

    #[test]
    fn pure_insertion_block_replaces_nothing() {
        let block = ChangeBlock {
            old_start: 4,
            deleted: 0,
            new_start: 4,
            added: 1,
        };
        assert_eq!(block.replaced_line(4), None);
    }

    #[test]
    fn block_near_u32_max_does_not_overflow() {
        let block = ChangeBlock {
            old_start: u32::MAX,
            deleted: 3,
            new_start: u32::MAX - 1,
            added: 3,
        };
        assert_eq!(block.replaced_line(u32::MAX - 1), Some(u32::MAX));
        assert_eq!(block.replaced_line(u32::MAX), None);
    }

    #[test]
    fn method_span_at_u32_max() {
        let m = MethodMetrics::new("f", u32::MAX - 1, u32::MAX, 1, 0);
        assert_eq!(m.nloc, 1);
    }

    #[test]
    fn changed_methods_cover_both_sides() {
        let mut m = Modification::new(
            Some("a.py".into()),
            Some("a.py".into()),
            ChangeKind::Modified,
            "",
        );
        m.diff_parsed.deleted.push(LineRecord::new(3, "gone()"));
        m.diff_parsed.added.push(LineRecord::new(8, "new()"));
        m.methods_before = Some(vec![
            MethodMetrics::new("removed", 1, 4, 1, 0),
            MethodMetrics::new("kept", 6, 9, 1, 0),
        ]);
        m.methods = Some(vec![MethodMetrics::new("kept", 3, 9, 1, 0)]);

        let names: Vec<&str> = m.changed_methods().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["kept", "removed"]);
    }

    #[test]
    fn changed_methods_need_metrics() {
        let mut m = Modification::new(None, Some("a.txt".into()), ChangeKind::Added, "");
        m.diff_parsed.added.push(LineRecord::new(1, "text"));
        assert!(m.changed_methods().is_empty());
    }

    #[test]
    fn method_span_defaults_nloc() {
        let m = MethodMetrics::new("f", 5, 5, 1, 0);
        assert_eq!(m.nloc, 1);
        assert_eq!(m.with_nloc(3).nloc, 3);
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "markdown".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn change_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ChangeKind::Deleted).unwrap();
        assert_eq!(json, "\"deleted\"");
    }
}
