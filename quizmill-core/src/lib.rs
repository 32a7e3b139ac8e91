pub mod branch;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod progression;
pub mod ratings;
pub mod store;

pub use branch::{BranchStrategy, DefaultProgression};
pub use config::QuizmillConfig;
pub use error::QuizmillError;
pub use progression::ProgressionEngine;
pub use ratings::{RatingAggregator, RatingSummary};
