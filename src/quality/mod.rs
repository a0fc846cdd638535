//! Run quality scoring.
//!
//! Reduces a [`Run`](crate::model::Run) to scalar scores:
//!
//! - **Ratios**: share of results per status
//! - **Weighted score**: successes weighted by check level
//! - **Composite score**: fixed per-status rubric
//!
//! # Usage
//!
//! ```no_run
//! use mdqa::quality::QualityScorer;
//! use mdqa::model::{Run, Status};
//!
//! let run = Run::new("doi:10.5063/F1", "suite.1");
//! let scorer = QualityScorer::default();
//! let card = scorer.score(&run, None);
//!
//! println!("success ratio: {}", scorer.ratio(&run, Status::Success));
//! println!("grade: {}", card.grade.letter());
//! ```

mod scorer;

pub use scorer::{
    LevelWeights, QualityGrade, QualityScorer, ScoreCard, StatusTally, SCORING_ENGINE_VERSION,
};
