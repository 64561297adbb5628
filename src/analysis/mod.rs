//! Stateless, single-pass analyses over graded results.

pub mod gpu_backfill;
pub mod hard_questions;
pub mod mcnemar;
pub mod pareto;
