//! Data model for quality suites and their runs.
//!
//! A [`Suite`] is an ordered list of [`Check`]s authored outside the engine
//! and loaded read-only. Evaluating a suite against one document produces a
//! [`Run`] holding exactly one [`CheckResult`] per check, in check order.
//!
//! Values flowing from documents into rule code are represented by the closed
//! [`Value`] type; a check's inputs are a [`Bindings`] map from selector name
//! to value.

mod level;
mod run;
mod suite;
mod value;

pub use level::*;
pub use run::*;
pub use suite::*;
pub use value::*;
