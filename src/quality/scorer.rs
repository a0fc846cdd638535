//! Run scorer.
//!
//! Reduces a [`Run`] to ratios per status, a level-weighted score, a
//! composite score and a score per check type, and bundles them into a
//! [`ScoreCard`].

use crate::model::{Level, Run, Status, Suite};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Scoring engine version
pub const SCORING_ENGINE_VERSION: &str = "1.0";

/// Weight of each check level in the weighted score.
///
/// Defaults rise monotonically from OPTIONAL (1) to SEVERE (6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LevelWeights {
    pub optional: f64,
    pub info: f64,
    pub warn: f64,
    pub required: f64,
    pub error: f64,
    pub severe: f64,
}

impl Default for LevelWeights {
    fn default() -> Self {
        Self {
            optional: 1.0,
            info: 2.0,
            warn: 3.0,
            required: 4.0,
            error: 5.0,
            severe: 6.0,
        }
    }
}

impl LevelWeights {
    #[must_use]
    pub const fn weight(&self, level: Level) -> f64 {
        match level {
            Level::Optional => self.optional,
            Level::Info => self.info,
            Level::Warn => self.warn,
            Level::Required => self.required,
            Level::Error => self.error,
            Level::Severe => self.severe,
        }
    }

    /// Weights in ascending level order
    #[must_use]
    pub const fn as_array(&self) -> [f64; 6] {
        [
            self.optional,
            self.info,
            self.warn,
            self.required,
            self.error,
            self.severe,
        ]
    }

    /// Whether every weight is non-negative and non-decreasing by level.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        let w = self.as_array();
        w.iter().all(|x| x.is_finite() && *x >= 0.0) && w.windows(2).all(|p| p[0] <= p[1])
    }
}

/// Contribution of each status to the composite score.
const COMPOSITE_FACTORS: [(Status, f64); 4] = [
    (Status::Success, 1.0),
    (Status::Failure, 0.0),
    (Status::Error, 0.0),
    (Status::Skip, 0.0),
];

/// Overall quality grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityGrade {
    /// Excellent: 90-100
    A,
    /// Good: 80-89
    B,
    /// Fair: 70-79
    C,
    /// Poor: 60-69
    D,
    /// Failing: <60
    F,
}

impl QualityGrade {
    /// Create grade from a 0-100 score
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        match score.clamp(0.0, 100.0) as u32 {
            90..=100 => Self::A,
            80..=89 => Self::B,
            70..=79 => Self::C,
            60..=69 => Self::D,
            _ => Self::F,
        }
    }

    #[must_use]
    pub const fn letter(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

/// Count and share of results with one status
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusTally {
    pub count: usize,
    pub ratio: f64,
}

/// Summary of a scored run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct ScoreCard {
    pub scoring_engine_version: String,
    pub run_id: String,
    pub total: usize,
    pub success: StatusTally,
    pub failure: StatusTally,
    pub error: StatusTally,
    pub skip: StatusTally,
    pub weighted_score: f64,
    pub composite_score: f64,
    /// Score per check type (e.g. Findable, Accessible), in suite order
    pub scores_by_type: IndexMap<String, f64>,
    pub grade: QualityGrade,
}

/// Scores runs. Pure computation; holds only the level weights.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    weights: LevelWeights,
}

impl QualityScorer {
    #[must_use]
    pub const fn new(weights: LevelWeights) -> Self {
        Self { weights }
    }

    #[must_use]
    pub const fn weights(&self) -> &LevelWeights {
        &self.weights
    }

    /// Share of results carrying `status`; 0 for an empty run.
    #[must_use]
    pub fn ratio(&self, run: &Run, status: Status) -> f64 {
        if run.is_empty() {
            return 0.0;
        }
        run.count(status) as f64 / run.len() as f64
    }

    /// Level-weighted share of successful results.
    ///
    /// Each result's level is taken from the check of the same id in `suite`
    /// when one is given and found, otherwise from the level recorded on the
    /// result. Returns 0 when the total weight is 0.
    #[must_use]
    pub fn weighted_score(&self, run: &Run, suite: Option<&Suite>) -> f64 {
        let mut total = 0.0;
        let mut earned = 0.0;
        for result in &run.results {
            let level = suite
                .and_then(|s| s.check(&result.check_id))
                .map_or(result.level, |c| c.effective_level());
            let weight = self.weights.weight(level);
            total += weight;
            if result.status == Status::Success {
                earned += weight;
            }
        }
        if total > 0.0 {
            earned / total
        } else {
            0.0
        }
    }

    /// Score of each check type named in `suite`.
    ///
    /// Passed checks are successes above INFO level; failed checks are
    /// REQUIRED checks that failed or errored. The score is passed over
    /// passed plus failed, and 0 when neither occurs. Results whose check
    /// has no type are not scored.
    #[must_use]
    pub fn scores_by_type(&self, run: &Run, suite: &Suite) -> IndexMap<String, f64> {
        let mut tallies: IndexMap<String, (usize, usize)> = IndexMap::new();
        for result in &run.results {
            let Some(check) = suite.check(&result.check_id) else {
                continue;
            };
            let Some(check_type) = check.check_type.as_deref() else {
                continue;
            };
            let level = check.effective_level();
            let tally = tallies.entry(check_type.to_string()).or_default();
            match result.status {
                Status::Success if level != Level::Info => tally.0 += 1,
                Status::Failure | Status::Error if level == Level::Required => tally.1 += 1,
                _ => {}
            }
        }
        tallies
            .into_iter()
            .map(|(check_type, (passed, failed))| {
                let score = if passed + failed == 0 {
                    0.0
                } else {
                    passed as f64 / (passed + failed) as f64
                };
                (check_type, score)
            })
            .collect()
    }

    /// Fixed-rubric score: each status ratio times its factor, summed.
    #[must_use]
    pub fn composite_score(&self, run: &Run) -> f64 {
        COMPOSITE_FACTORS
            .iter()
            .map(|(status, factor)| factor * self.ratio(run, *status))
            .sum()
    }

    /// Score a run into a [`ScoreCard`].
    pub fn score(&self, run: &Run, suite: Option<&Suite>) -> ScoreCard {
        let tally = |status| StatusTally {
            count: run.count(status),
            ratio: self.ratio(run, status),
        };
        let composite_score = self.composite_score(run);
        ScoreCard {
            scoring_engine_version: SCORING_ENGINE_VERSION.to_string(),
            run_id: run.id.clone(),
            total: run.len(),
            success: tally(Status::Success),
            failure: tally(Status::Failure),
            error: tally(Status::Error),
            skip: tally(Status::Skip),
            weighted_score: self.weighted_score(run, suite),
            composite_score,
            scores_by_type: suite.map(|s| self.scores_by_type(run, s)).unwrap_or_default(),
            grade: QualityGrade::from_score(composite_score * 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Check, CheckResult};

    fn run_of(statuses: &[(Status, Level)]) -> Run {
        let mut run = Run::new("obj", "suite");
        for (i, (status, level)) in statuses.iter().enumerate() {
            run.results.push(CheckResult::new(format!("check.{i}"), *level, *status));
        }
        run
    }

    fn six_results() -> Run {
        run_of(&[
            (Status::Success, Level::Info),
            (Status::Success, Level::Info),
            (Status::Success, Level::Info),
            (Status::Success, Level::Info),
            (Status::Failure, Level::Info),
            (Status::Error, Level::Info),
        ])
    }

    #[test]
    fn test_ratios() {
        let scorer = QualityScorer::default();
        let run = six_results();
        assert!((scorer.ratio(&run, Status::Success) - 4.0 / 6.0).abs() < 1e-12);
        assert!((scorer.ratio(&run, Status::Failure) - 1.0 / 6.0).abs() < 1e-12);
        assert!((scorer.ratio(&run, Status::Error) - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(scorer.ratio(&run, Status::Skip), 0.0);
    }

    #[test]
    fn test_empty_run_scores_zero() {
        let scorer = QualityScorer::default();
        let run = Run::new("obj", "suite");
        assert_eq!(scorer.ratio(&run, Status::Success), 0.0);
        assert_eq!(scorer.weighted_score(&run, None), 0.0);
        assert_eq!(scorer.composite_score(&run), 0.0);
    }

    #[test]
    fn test_weighted_score_uses_levels() {
        let scorer = QualityScorer::default();
        let run = run_of(&[(Status::Success, Level::Severe), (Status::Failure, Level::Optional)]);
        assert!((scorer.weighted_score(&run, None) - 6.0 / 7.0).abs() < 1e-12);

        // Levels from the suite override those recorded on results
        let suite = Suite::new("suite", "s")
            .with_check(Check::new("check.0").level(Level::Optional).code("TRUE"))
            .with_check(Check::new("check.1").level(Level::Severe).code("TRUE"));
        assert!((scorer.weighted_score(&run, Some(&suite)) - 1.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weights() {
        let weights = LevelWeights {
            optional: 0.0,
            info: 0.0,
            warn: 0.0,
            required: 0.0,
            error: 0.0,
            severe: 0.0,
        };
        let run = run_of(&[(Status::Success, Level::Info)]);
        assert_eq!(QualityScorer::new(weights).weighted_score(&run, None), 0.0);
    }

    #[test]
    fn test_composite_equals_success_ratio() {
        let scorer = QualityScorer::default();
        let run = six_results();
        assert!((scorer.composite_score(&run) - scorer.ratio(&run, Status::Success)).abs() < 1e-12);
    }

    #[test]
    fn test_score_card() {
        let card = QualityScorer::default().score(&six_results(), None);
        assert_eq!(card.total, 6);
        assert_eq!(card.success.count, 4);
        assert_eq!(card.skip.count, 0);
        assert_eq!(card.grade, QualityGrade::F);
        let perfect = run_of(&[(Status::Success, Level::Warn)]);
        assert_eq!(QualityScorer::default().score(&perfect, None).grade, QualityGrade::A);
    }

    #[test]
    fn test_scores_by_type() {
        let suite = Suite::new("suite", "s")
            .with_check(Check::new("check.0").check_type("Findable").level(Level::Required).code("TRUE"))
            .with_check(Check::new("check.1").check_type("Findable").level(Level::Required).code("TRUE"))
            .with_check(Check::new("check.2").check_type("Findable").level(Level::Info).code("TRUE"))
            .with_check(Check::new("check.3").check_type("Accessible").level(Level::Warn).code("TRUE"))
            .with_check(Check::new("check.4").check_type("Accessible").level(Level::Optional).code("TRUE"))
            .with_check(Check::new("check.5").check_type("Reusable").level(Level::Info).code("TRUE"))
            .with_check(Check::new("check.6").level(Level::Required).code("TRUE"));
        let run = run_of(&[
            (Status::Success, Level::Info),
            (Status::Error, Level::Info),
            (Status::Success, Level::Info),
            (Status::Failure, Level::Info),
            (Status::Success, Level::Info),
            (Status::Success, Level::Info),
            (Status::Failure, Level::Info),
        ]);

        let scores = QualityScorer::default().scores_by_type(&run, &suite);
        let types: Vec<&str> = scores.keys().map(String::as_str).collect();
        assert_eq!(types, vec!["Findable", "Accessible", "Reusable"]);
        // INFO success does not count as passed
        assert!((scores["Findable"] - 0.5).abs() < 1e-12);
        // WARN failure does not count as failed
        assert!((scores["Accessible"] - 1.0).abs() < 1e-12);
        assert_eq!(scores["Reusable"], 0.0);

        let card = QualityScorer::default().score(&run, Some(&suite));
        assert_eq!(card.scores_by_type, scores);
        assert!(QualityScorer::default().score(&run, None).scores_by_type.is_empty());
    }

    #[test]
    fn test_grade_from_score() {
        assert_eq!(QualityGrade::from_score(95.0), QualityGrade::A);
        assert_eq!(QualityGrade::from_score(85.0), QualityGrade::B);
        assert_eq!(QualityGrade::from_score(75.0), QualityGrade::C);
        assert_eq!(QualityGrade::from_score(65.0), QualityGrade::D);
        assert_eq!(QualityGrade::from_score(55.0), QualityGrade::F);
        assert_eq!(QualityGrade::from_score(120.0), QualityGrade::A);
    }

    #[test]
    fn test_default_weights_are_monotonic() {
        assert!(LevelWeights::default().is_monotonic());
        let broken = LevelWeights {
            severe: 0.5,
            ..LevelWeights::default()
        };
        assert!(!broken.is_monotonic());
    }
}
