//! Core domain types for the tide pool.

pub mod ids;
pub mod job;
pub mod pr;

pub use ids::{InvalidSha, PrNumber, RepoId, Sha};
pub use job::{Job, JobState, JobType, Pull, Refs};
pub use pr::{CommitStatusState, PullRequest};
