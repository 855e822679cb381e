//! Delta Maintainability Model.
//!
//! Methods are binned into low and high risk per structural property, the
//! bins are weighted by method length, and a commit's score is the share of
//! "good" change (more low-risk code, less high-risk code) in its total
//! change.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use strata_core::{Commit, MethodMetrics, Modification};

/// Structural property a risk profile is computed for.
///
/// # Examples
///
/// ```
/// use strata_core::MethodMetrics;
/// use strata_difflens::dmm::DmmProperty;
///
/// let method = MethodMetrics::new("f", 1, 15, 6, 2);
/// assert!(DmmProperty::UnitSize.is_low_risk(&method));
/// assert!(!DmmProperty::UnitComplexity.is_low_risk(&method));
/// assert!(DmmProperty::UnitInterfacing.is_low_risk(&method));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DmmProperty {
    /// Method length in lines of code.
    UnitSize,
    /// Cyclomatic complexity.
    UnitComplexity,
    /// Parameter count.
    UnitInterfacing,
}

impl DmmProperty {
    /// All properties, in reporting order.
    pub const ALL: [DmmProperty; 3] = [
        DmmProperty::UnitSize,
        DmmProperty::UnitComplexity,
        DmmProperty::UnitInterfacing,
    ];

    /// Largest value still considered low risk.
    pub fn threshold(self) -> u32 {
        match self {
            DmmProperty::UnitSize => 15,
            DmmProperty::UnitComplexity => 5,
            DmmProperty::UnitInterfacing => 2,
        }
    }

    /// The method's value for this property.
    pub fn value(self, method: &MethodMetrics) -> u32 {
        match self {
            DmmProperty::UnitSize => method.nloc,
            DmmProperty::UnitComplexity => method.cyclomatic_complexity,
            DmmProperty::UnitInterfacing => method.parameter_count,
        }
    }

    /// Whether the method is at or below the low-risk threshold.
    pub fn is_low_risk(self, method: &MethodMetrics) -> bool {
        self.value(method) <= self.threshold()
    }
}

impl fmt::Display for DmmProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmmProperty::UnitSize => write!(f, "unit size"),
            DmmProperty::UnitComplexity => write!(f, "unit complexity"),
            DmmProperty::UnitInterfacing => write!(f, "unit interfacing"),
        }
    }
}

/// Lines of code in low-risk and high-risk methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Volume of low-risk methods.
    pub low: u64,
    /// Volume of the remaining methods.
    pub high: u64,
}

impl RiskProfile {
    /// Bin `methods` by `property`, weighting each method by its `nloc`.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::MethodMetrics;
    /// use strata_difflens::dmm::{DmmProperty, RiskProfile};
    ///
    /// let methods = [
    ///     MethodMetrics::new("small", 1, 10, 1, 0),
    ///     MethodMetrics::new("big", 20, 59, 1, 0),
    /// ];
    /// let profile = RiskProfile::of(&methods, DmmProperty::UnitSize);
    /// assert_eq!((profile.low, profile.high), (10, 40));
    /// ```
    pub fn of(methods: &[MethodMetrics], property: DmmProperty) -> Self {
        methods.iter().fold(Self::default(), |mut acc, m| {
            if property.is_low_risk(m) {
                acc.low += u64::from(m.nloc);
            } else {
                acc.high += u64::from(m.nloc);
            }
            acc
        })
    }

    /// Signed change from `before` to `self`.
    pub fn delta_from(self, before: RiskProfile) -> DeltaRiskProfile {
        DeltaRiskProfile {
            low: self.low as i64 - before.low as i64,
            high: self.high as i64 - before.high as i64,
        }
    }
}

/// Signed change in low-risk and high-risk volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRiskProfile {
    /// Change in low-risk volume.
    pub low: i64,
    /// Change in high-risk volume.
    pub high: i64,
}

impl DeltaRiskProfile {
    /// Share of good change in this delta, see [`good_change_proportion`].
    pub fn proportion(self) -> Option<f64> {
        good_change_proportion(self.low, self.high)
    }
}

impl Add for DeltaRiskProfile {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            low: self.low + rhs.low,
            high: self.high + rhs.high,
        }
    }
}

impl AddAssign for DeltaRiskProfile {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Proportion of good change in a delta risk profile.
///
/// Growing low-risk code and shrinking high-risk code is good; the opposite
/// is bad. Returns `None` when nothing changed.
///
/// # Examples
///
/// ```
/// use strata_difflens::dmm::good_change_proportion;
///
/// assert_eq!(good_change_proportion(0, 0), None);
/// assert_eq!(good_change_proportion(1, -1), Some(1.0));
/// assert_eq!(good_change_proportion(1, 1), Some(0.5));
/// ```
pub fn good_change_proportion(delta_low: i64, delta_high: i64) -> Option<f64> {
    let good = delta_low.max(0) + (-delta_high).max(0);
    let bad = (-delta_low).max(0) + delta_high.max(0);
    let total = good + bad;
    (total != 0).then(|| good as f64 / total as f64)
}

/// Delta risk profile of one modification, or `None` when its language has
/// no method metrics.
pub fn modification_delta(
    modification: &Modification,
    property: DmmProperty,
) -> Option<DeltaRiskProfile> {
    let before = modification.methods_before.as_deref()?;
    let after = modification.methods.as_deref()?;
    Some(RiskProfile::of(after, property).delta_from(RiskProfile::of(before, property)))
}

/// Sum of the delta risk profiles of every supported modification in a commit.
///
/// Returns `None` when no modification of the commit is supported.
pub fn commit_delta(commit: &Commit, property: DmmProperty) -> Option<DeltaRiskProfile> {
    commit
        .modifications
        .iter()
        .filter_map(|m| modification_delta(m, property))
        .reduce(Add::add)
}

/// DMM value of a commit for one property, in `[0.0, 1.0]`.
pub fn commit_dmm(commit: &Commit, property: DmmProperty) -> Option<f64> {
    commit_delta(commit, property)?.proportion()
}

/// The three DMM values of a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmmScores {
    /// Unit size score.
    pub unit_size: Option<f64>,
    /// Unit complexity score.
    pub unit_complexity: Option<f64>,
    /// Unit interfacing score.
    pub unit_interfacing: Option<f64>,
}

impl DmmScores {
    /// Compute all three scores for `commit`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::DateTime;
    /// use strata_core::{Commit, Developer};
    /// use strata_difflens::dmm::DmmScores;
    ///
    /// let date = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap();
    /// let commit = Commit::new("abc", Developer::new("a", "a@x"), date);
    /// assert_eq!(DmmScores::for_commit(&commit), DmmScores::default());
    /// ```
    pub fn for_commit(commit: &Commit) -> Self {
        Self {
            unit_size: commit_dmm(commit, DmmProperty::UnitSize),
            unit_complexity: commit_dmm(commit, DmmProperty::UnitComplexity),
            unit_interfacing: commit_dmm(commit, DmmProperty::UnitInterfacing),
        }
    }

    /// Score for a single property.
    pub fn get(&self, property: DmmProperty) -> Option<f64> {
        match property {
            DmmProperty::UnitSize => self.unit_size,
            DmmProperty::UnitComplexity => self.unit_complexity,
            DmmProperty::UnitInterfacing => self.unit_interfacing,
        }
    }
}
