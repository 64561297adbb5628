//! qabench library: answer generation, grading and analysis for a historical
//! trivia benchmark. The `qabench` binary is a thin CLI over these modules.

pub mod analysis;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod generate;
pub mod grade;
pub mod maintenance;
pub mod plot;
pub mod providers;
pub mod records;
pub mod utils;
