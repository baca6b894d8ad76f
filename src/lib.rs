//! pool_stage Library
//!
//! Re-exports modules for integration testing and the binaries.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod stage;
pub mod stats;
pub mod telemetry;

mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use repository::{DataStoreConfig, RepositoryError, RepositoryFactory, StoreRepository};
pub use stage::{CampaignConfig, CampaignError, CampaignReport, Stage};
