//! Per-file review: prompt composition, the model call and response parsing.

pub mod client;
pub mod parser;
pub mod prompt;
pub mod types;

pub use client::{OpenAiModel, ReviewClient, ReviewModel};
pub use prompt::ReviewInstructions;
pub use types::{
    FileOutcome, FileReviewResult, Finding, RequirementCoverage, RequirementStatus, Severity,
};
