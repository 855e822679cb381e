//! Process metrics over a commit range.
//!
//! Every figure is accumulated in a single newest-to-oldest pass over the
//! range. A rename maps the old path to the newest known name, so history
//! recorded before the rename accrues to the file's current path.
//!
//! Release-scoped figures cover the latest release: the newest commit in
//! range and every older one up to, not including, the next tagged commit.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strata_core::{ChangeKind, Commit, MiningConfig, Order, Result};
use tracing::info;

use crate::backend::VcsBackend;
use crate::traverse::traverse_backend;

/// Contributors below this share of a file's changed lines are minor.
const MINOR_CONTRIBUTOR_SHARE: f64 = 0.05;

/// The commits a metrics run covers, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsRange {
    /// Between two commits.
    Commits { from: String, to: String },
    /// Between two committer dates.
    Dates {
        since: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    },
}

impl MetricsRange {
    /// Traversal settings selecting this range, newest first.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_gitpulse::process::MetricsRange;
    ///
    /// let range = MetricsRange::Commits { from: "abc".into(), to: "abc".into() };
    /// let config = range.to_config();
    /// assert_eq!(config.single.as_deref(), Some("abc"));
    /// assert!(config.from_commit.is_none());
    /// ```
    pub fn to_config(&self) -> MiningConfig {
        let mut config = MiningConfig {
            order: Some(Order::Reverse),
            ..MiningConfig::default()
        };
        match self {
            Self::Commits { from, to } if from == to => config.single = Some(from.clone()),
            Self::Commits { from, to } => {
                config.from_commit = Some(from.clone());
                config.to_commit = Some(to.clone());
            }
            Self::Dates { since, to } => {
                config.since = Some(*since);
                config.to = Some(*to);
            }
        }
        config
    }
}

/// Total, maximum and rounded mean of a per-commit quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally<T> {
    pub count: T,
    pub max: T,
    pub avg: T,
}

impl Tally<u64> {
    fn of(values: &[u64]) -> Self {
        let count: u64 = values.iter().sum();
        Self {
            count,
            max: values.iter().copied().max().unwrap_or_default(),
            avg: rounded_mean(count as f64, values.len()) as u64,
        }
    }
}

impl Tally<i64> {
    fn of(values: &[i64]) -> Self {
        let count: i64 = values.iter().sum();
        Self {
            count,
            max: values.iter().copied().max().unwrap_or_default(),
            avg: rounded_mean(count as f64, values.len()) as i64,
        }
    }
}

/// Who changed a file, weighted by lines added plus removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributors {
    /// Distinct author emails.
    pub count: usize,
    /// Authors with less than 5% of the changed lines.
    pub minor: usize,
    /// Percentage of changed lines from the largest contributor, to two
    /// decimals.
    pub experience: f64,
}

/// Authors of a file, by trimmed email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Developers {
    /// Everyone who touched the file in range.
    pub distinct: usize,
    /// Everyone who touched it in the latest release.
    pub active: usize,
    /// Active developers with no earlier commit to the file in range.
    pub new: usize,
}

/// The largest contributor to a file in the latest release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub email: String,
    /// Owner's share of the file's changed lines in the latest release.
    pub lines_share: f64,
    /// Owner's share of all changed lines in range, across every file.
    pub experience: f64,
}

/// Process metrics of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetrics {
    /// Commits in range that touched the file.
    pub commit_count: u64,
    /// Added minus removed lines, per commit.
    pub churn: Tally<i64>,
    pub lines_added: Tally<u64>,
    pub lines_removed: Tally<u64>,
    /// `None` when no line was added or removed in range.
    pub contributors: Option<Contributors>,
    /// Median changed-block count per commit, rounded up.
    pub hunks_median: u32,
    pub developers: Developers,
    /// `None` when the latest release changed no line of the file.
    pub owner: Option<Owner>,
    /// Lines added to the file over lines added to any file in range.
    pub normalized_added: f64,
    /// Lines removed from the file over lines removed from any file.
    pub normalized_removed: f64,
}

/// Metrics of every file touched in a range.
///
/// # Examples
///
/// ```
/// use strata_gitpulse::memory::{CommitBuilder, MemoryBackend};
/// use strata_gitpulse::process::{MetricsRange, ProcessMetrics};
///
/// let mut repo = MemoryBackend::new("demo");
/// repo.push(CommitBuilder::new("a").timestamp(1).add("x.rs", &["fn x() {}"]).build());
/// repo.push(
///     CommitBuilder::new("b")
///         .parents(&["a"])
///         .timestamp(2)
///         .modify("x.rs", "@@ -1 +1,2 @@\n fn x() {}\n+fn y() {}\n")
///         .build(),
/// );
///
/// let range = MetricsRange::Commits { from: "a".into(), to: "b".into() };
/// let metrics = ProcessMetrics::compute(repo, &range).unwrap();
/// let file = metrics.file("x.rs").unwrap();
/// assert_eq!(file.commit_count, 2);
/// assert_eq!(file.lines_added.count, 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetrics {
    /// Commits in range.
    pub commits: usize,
    /// Most files changed by one commit.
    pub change_set_max: u64,
    /// Rounded mean of files changed per commit.
    pub change_set_avg: u64,
    /// Geometric mean of the lines each author changed in range, to two
    /// decimals; 0 when some author changed none.
    pub developer_experience: f64,
    /// Per-file metrics, keyed by the newest path of each file.
    pub files: BTreeMap<String, FileMetrics>,
}

impl ProcessMetrics {
    /// Traverse `range` on `backend` and compute its metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the range does not resolve or a commit cannot be
    /// read.
    pub fn compute<B>(backend: B, range: &MetricsRange) -> Result<Self>
    where
        B: VcsBackend + 'static,
    {
        let project = backend.project_name();
        let commits = traverse_backend(backend, &range.to_config())?;
        let mut history = History::default();
        for commit in commits {
            history.record(&commit?);
        }
        let metrics = history.finish();
        info!(
            project = %project,
            commits = metrics.commits,
            files = metrics.files.len(),
            "computed process metrics"
        );
        Ok(metrics)
    }

    /// Metrics from commits already listed newest first.
    pub fn from_commits<'c, I>(commits: I) -> Self
    where
        I: IntoIterator<Item = &'c Commit>,
    {
        let mut history = History::default();
        for commit in commits {
            history.record(commit);
        }
        history.finish()
    }

    pub fn file(&self, path: &str) -> Option<&FileMetrics> {
        self.files.get(path)
    }
}

#[derive(Debug, Default)]
struct FileHistory {
    churn: Vec<i64>,
    added: Vec<u64>,
    removed: Vec<u64>,
    hunks: Vec<u32>,
    contributions: HashMap<String, u64>,
    release_contributions: HashMap<String, u64>,
    earlier_authors: HashSet<String>,
}

#[derive(Debug)]
struct History {
    change_sets: Vec<u64>,
    renamed: HashMap<String, String>,
    files: HashMap<String, FileHistory>,
    /// Lines changed per author over every file.
    contributions: HashMap<String, u64>,
    total_added: u64,
    total_removed: u64,
    in_release: bool,
}

impl Default for History {
    fn default() -> Self {
        Self {
            change_sets: Vec::new(),
            renamed: HashMap::new(),
            files: HashMap::new(),
            contributions: HashMap::new(),
            total_added: 0,
            total_removed: 0,
            in_release: true,
        }
    }
}

impl History {
    fn record(&mut self, commit: &Commit) {
        if commit.tag.is_some() && !self.change_sets.is_empty() {
            self.in_release = false;
        }
        self.change_sets.push(commit.files() as u64);
        let author = commit.author.email.trim().to_string();

        for modification in &commit.modifications {
            let path = modification.path();
            let path = self
                .renamed
                .get(path)
                .cloned()
                .unwrap_or_else(|| path.to_string());
            if modification.change_kind == ChangeKind::Renamed {
                if let Some(old) = &modification.old_path {
                    self.renamed.insert(old.clone(), path.clone());
                }
            }

            let added = modification.added_lines();
            let removed = modification.deleted_lines();
            self.total_added += added;
            self.total_removed += removed;
            *self.contributions.entry(author.clone()).or_default() += added + removed;

            let file = self.files.entry(path).or_default();
            file.added.push(added);
            file.removed.push(removed);
            file.churn.push(added as i64 - removed as i64);
            file.hunks.push(modification.hunk_count());
            *file.contributions.entry(author.clone()).or_default() += added + removed;
            if self.in_release {
                *file.release_contributions.entry(author.clone()).or_default() += added + removed;
            } else {
                file.earlier_authors.insert(author.clone());
            }
        }
    }

    fn finish(self) -> ProcessMetrics {
        let change_set_total: u64 = self.change_sets.iter().sum();
        let range = RangeTotals {
            contributions: &self.contributions,
            added: self.total_added,
            removed: self.total_removed,
        };
        let files = self
            .files
            .into_iter()
            .map(|(path, file)| (path, file.finish(&range)))
            .collect();
        ProcessMetrics {
            commits: self.change_sets.len(),
            change_set_max: self.change_sets.iter().copied().max().unwrap_or_default(),
            change_set_avg: rounded_mean(change_set_total as f64, self.change_sets.len()) as u64,
            developer_experience: geometric_mean(self.contributions.values().copied()),
            files,
        }
    }
}

struct RangeTotals<'h> {
    contributions: &'h HashMap<String, u64>,
    added: u64,
    removed: u64,
}

impl FileHistory {
    fn finish(self, range: &RangeTotals<'_>) -> FileMetrics {
        let added: u64 = self.added.iter().sum();
        let removed: u64 = self.removed.iter().sum();
        FileMetrics {
            commit_count: self.added.len() as u64,
            churn: Tally::<i64>::of(&self.churn),
            lines_added: Tally::<u64>::of(&self.added),
            lines_removed: Tally::<u64>::of(&self.removed),
            contributors: contributors(&self.contributions),
            hunks_median: median_ceil(self.hunks),
            developers: Developers {
                distinct: self.contributions.len(),
                active: self.release_contributions.len(),
                new: self
                    .release_contributions
                    .keys()
                    .filter(|author| !self.earlier_authors.contains(*author))
                    .count(),
            },
            owner: owner(&self.release_contributions, range.contributions),
            normalized_added: ratio(added, range.added),
            normalized_removed: ratio(removed, range.removed),
        }
    }
}

fn contributors(contributions: &HashMap<String, u64>) -> Option<Contributors> {
    let total: u64 = contributions.values().sum();
    if total == 0 {
        return None;
    }
    let total = total as f64;
    let largest = contributions.values().copied().max().unwrap_or_default() as f64;
    Some(Contributors {
        count: contributions.len(),
        minor: contributions
            .values()
            .filter(|&&lines| (lines as f64) / total < MINOR_CONTRIBUTOR_SHARE)
            .count(),
        experience: round_to(100.0 * largest / total, 2),
    })
}

fn owner(release: &HashMap<String, u64>, range: &HashMap<String, u64>) -> Option<Owner> {
    let total: u64 = release.values().sum();
    if total == 0 {
        return None;
    }
    let (email, lines) = release
        .iter()
        .max_by(|(a, x), (b, y)| x.cmp(y).then_with(|| b.cmp(a)))?;
    let range_total: u64 = range.values().sum();
    let experience = ratio(range.get(email).copied().unwrap_or_default(), range_total);
    Some(Owner {
        email: email.clone(),
        lines_share: round_to(ratio(*lines, total), 4),
        experience: round_to(experience, 4),
    })
}

fn geometric_mean(values: impl Iterator<Item = u64>) -> f64 {
    let mut log_sum = 0.0;
    let mut n = 0usize;
    for value in values {
        if value == 0 {
            return 0.0;
        }
        log_sum += (value as f64).ln();
        n += 1;
    }
    if n == 0 {
        return 0.0;
    }
    round_to((log_sum / n as f64).exp(), 2)
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

fn rounded_mean(total: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (total / n as f64).round_ties_even()
}

fn median_ceil(mut values: Vec<u32>) -> u32 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        let sum = u64::from(values[mid - 1]) + u64::from(values[mid]);
        u32::try_from(sum.div_ceil(2)).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CommitBuilder, MemoryBackend};

    fn history() -> MemoryBackend {
        let mut repo = MemoryBackend::new("metrics");
        repo.push(
            CommitBuilder::new("c1")
                .timestamp(100)
                .author("alice", "alice@example.com")
                .add("a.py", &["x", "y", "z"])
                .build(),
        );
        repo.push(
            CommitBuilder::new("c2")
                .parents(&["c1"])
                .timestamp(200)
                .author("bob", " bob@example.com ")
                .modify("a.py", "@@ -1,3 +1,3 @@\n-x\n+X\n y\n z\n")
                .add("b.py", &["print()"])
                .build(),
        );
        repo.push(
            CommitBuilder::new("c3")
                .parents(&["c2"])
                .timestamp(300)
                .author("alice", "alice@example.com")
                .rename("a.py", "c.py", "@@ -1,3 +1,4 @@\n X\n y\n z\n+w\n")
                .build(),
        );
        repo.push(
            CommitBuilder::new("c4")
                .parents(&["c3"])
                .timestamp(400)
                .author("alice", "alice@example.com")
                .modify("c.py", "@@ -1,4 +1,2 @@\n-X\n y\n-z\n w\n")
                .build(),
        );
        repo
    }

    fn full_range() -> MetricsRange {
        MetricsRange::Commits {
            from: "c1".into(),
            to: "c4".into(),
        }
    }

    #[test]
    fn history_before_rename_accrues_to_new_path() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        assert_eq!(metrics.files.keys().collect::<Vec<_>>(), ["b.py", "c.py"]);
        assert_eq!(metrics.file("c.py").unwrap().commit_count, 4);
    }

    #[test]
    fn line_tallies() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        let file = metrics.file("c.py").unwrap();
        assert_eq!(file.lines_added, Tally { count: 5, max: 3, avg: 1 });
        assert_eq!(file.lines_removed, Tally { count: 3, max: 2, avg: 1 });
    }

    #[test]
    fn churn_mean_rounds_half_to_even() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        // per commit: +3, 0, +1, -2 => 2 / 4 = 0.5
        assert_eq!(
            metrics.file("c.py").unwrap().churn,
            Tally { count: 2, max: 3, avg: 0 }
        );
    }

    #[test]
    fn contributors_by_trimmed_email() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        let contributors = metrics.file("c.py").unwrap().contributors.unwrap();
        assert_eq!(contributors.count, 2);
        assert_eq!(contributors.minor, 0);
        assert_eq!(contributors.experience, 75.0);

        let single = metrics.file("b.py").unwrap().contributors.unwrap();
        assert_eq!(single.count, 1);
        assert_eq!(single.experience, 100.0);
    }

    #[test]
    fn hunk_median_and_change_sets() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        assert_eq!(metrics.file("c.py").unwrap().hunks_median, 1);
        assert_eq!(metrics.commits, 4);
        assert_eq!(metrics.change_set_max, 2);
        assert_eq!(metrics.change_set_avg, 1);
    }

    #[test]
    fn sums_match_per_commit_values() {
        let repo = history();
        let commits: Vec<Commit> = ["c4", "c3", "c2", "c1"]
            .iter()
            .map(|h| repo.commit(h).unwrap())
            .collect();
        let per_commit_added: u64 = commits
            .iter()
            .flat_map(|c| &c.modifications)
            .filter(|m| m.path() != "b.py")
            .map(|m| m.added_lines())
            .sum();

        let metrics = ProcessMetrics::from_commits(&commits);
        let file = metrics.file("c.py").unwrap();
        assert_eq!(file.lines_added.count, per_commit_added);
        assert_eq!(
            file.lines_added.avg,
            (file.lines_added.count as f64 / file.commit_count as f64).round_ties_even() as u64
        );
    }

    #[test]
    fn date_range_is_inclusive() {
        let range = MetricsRange::Dates {
            since: DateTime::parse_from_rfc3339("1970-01-01T00:03:20Z").unwrap(),
            to: DateTime::parse_from_rfc3339("1970-01-01T00:05:00Z").unwrap(),
        };
        let metrics = ProcessMetrics::compute(history(), &range).unwrap();
        assert_eq!(metrics.commits, 2);
        assert_eq!(metrics.file("c.py").unwrap().commit_count, 2);
        assert_eq!(metrics.file("b.py").unwrap().lines_added.count, 1);
    }

    #[test]
    fn identical_bounds_cover_one_commit() {
        let range = MetricsRange::Commits {
            from: "c2".into(),
            to: "c2".into(),
        };
        let metrics = ProcessMetrics::compute(history(), &range).unwrap();
        assert_eq!(metrics.commits, 1);
        assert_eq!(metrics.change_set_max, 2);
    }

    #[test]
    fn untouched_lines_leave_no_contributors() {
        let mut repo = history();
        repo.push(
            CommitBuilder::new("c5")
                .parents(&["c4"])
                .timestamp(500)
                .rename("b.py", "d.py", "")
                .build(),
        );
        let range = MetricsRange::Commits {
            from: "c5".into(),
            to: "c5".into(),
        };
        let metrics = ProcessMetrics::compute(repo, &range).unwrap();
        assert!(metrics.file("d.py").unwrap().contributors.is_none());
    }

    fn released_history() -> MemoryBackend {
        let mut repo = history();
        repo.tag("v1", "c2");
        repo
    }

    #[test]
    fn whole_range_is_one_release_without_tags() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        let file = metrics.file("c.py").unwrap();
        assert_eq!(file.developers, Developers { distinct: 2, active: 2, new: 2 });
        let owner = file.owner.as_ref().unwrap();
        assert_eq!(owner.email, "alice@example.com");
        assert_eq!(owner.lines_share, 0.75);
        assert_eq!(owner.experience, 0.6667);
    }

    #[test]
    fn tagged_commit_closes_the_latest_release() {
        let metrics = ProcessMetrics::compute(released_history(), &full_range()).unwrap();
        let file = metrics.file("c.py").unwrap();
        assert_eq!(file.developers, Developers { distinct: 2, active: 1, new: 0 });
        let owner = file.owner.as_ref().unwrap();
        assert_eq!(owner.email, "alice@example.com");
        assert_eq!(owner.lines_share, 1.0);
        assert_eq!(owner.experience, 0.6667);

        let untouched = metrics.file("b.py").unwrap();
        assert_eq!(untouched.developers, Developers { distinct: 1, active: 0, new: 0 });
        assert!(untouched.owner.is_none());
    }

    #[test]
    fn newest_commit_belongs_to_its_own_release() {
        let range = MetricsRange::Commits {
            from: "c2".into(),
            to: "c2".into(),
        };
        let metrics = ProcessMetrics::compute(released_history(), &range).unwrap();
        let file = metrics.file("b.py").unwrap();
        assert_eq!(file.developers, Developers { distinct: 1, active: 1, new: 1 });
        assert_eq!(file.owner.as_ref().unwrap().email, "bob@example.com");
    }

    #[test]
    fn new_developers_exclude_earlier_authors() {
        let mut repo = released_history();
        repo.push(
            CommitBuilder::new("c5")
                .parents(&["c4"])
                .timestamp(500)
                .author("carol", "carol@example.com")
                .modify("c.py", "@@ -1,2 +1,3 @@\n y\n w\n+v\n")
                .build(),
        );
        let range = MetricsRange::Commits {
            from: "c1".into(),
            to: "c5".into(),
        };
        let metrics = ProcessMetrics::compute(repo, &range).unwrap();
        let file = metrics.file("c.py").unwrap();
        assert_eq!(file.developers, Developers { distinct: 3, active: 2, new: 1 });
    }

    #[test]
    fn owner_ties_go_to_the_smallest_email() {
        let release = HashMap::from([("b@x".to_string(), 2), ("a@x".to_string(), 2)]);
        let owner = owner(&release, &release).unwrap();
        assert_eq!(owner.email, "a@x");
        assert_eq!(owner.lines_share, 0.5);
        assert_eq!(owner.experience, 0.5);
        assert!(super::owner(&HashMap::new(), &release).is_none());
    }

    #[test]
    fn lines_are_normalized_by_range_totals() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        let file = metrics.file("c.py").unwrap();
        assert_eq!(file.normalized_added, 5.0 / 6.0);
        assert_eq!(file.normalized_removed, 1.0);
        let other = metrics.file("b.py").unwrap();
        assert_eq!(other.normalized_added, 1.0 / 6.0);
        assert_eq!(other.normalized_removed, 0.0);
    }

    #[test]
    fn developer_experience_is_a_geometric_mean() {
        let metrics = ProcessMetrics::compute(history(), &full_range()).unwrap();
        // alice changed 6 lines, bob 3
        assert_eq!(metrics.developer_experience, 4.24);

        assert_eq!(geometric_mean([4, 0].into_iter()), 0.0);
        assert_eq!(geometric_mean(std::iter::empty()), 0.0);
    }

    #[test]
    fn even_median_rounds_up() {
        assert_eq!(median_ceil(vec![1, 2]), 2);
        assert_eq!(median_ceil(vec![3, 1, 2]), 2);
        assert_eq!(median_ceil(Vec::new()), 0);
        assert_eq!(median_ceil(vec![u32::MAX, u32::MAX]), u32::MAX);
    }

    #[test]
    fn minor_contributors_under_five_percent() {
        let contributions = HashMap::from([("a".to_string(), 96), ("b".to_string(), 4)]);
        let stats = contributors(&contributions).unwrap();
        assert_eq!(stats.minor, 1);
        assert_eq!(stats.experience, 96.0);
    }
}
