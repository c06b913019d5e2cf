pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{DevaluationConfig, RankingConfig};
pub use services::{DevaluationEngine, RankingPipeline, ScoreCache, SessionTracker};
