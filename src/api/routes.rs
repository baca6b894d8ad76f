//! API Routes
//!
//! Campaign trigger endpoint and its request types.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::middleware::mask_connection_string;
use crate::error::AppError;
use crate::repository::{DataStoreConfig, RepositoryFactory, TableName};
use crate::stage::{CampaignConfig, Stage};

// =========================================================================
// State
// =========================================================================

/// Shared state for the campaign routes
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn RepositoryFactory>,
}

impl AppState {
    pub fn new(factory: Arc<dyn RepositoryFactory>) -> Self {
        Self { factory }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

/// Campaign description. Missing fields default to zero/empty and are
/// reported by validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageRequest {
    pub db_config: DbConfigRequest,
    pub stage_config: StageConfigRequest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfigRequest {
    pub db_name: String,
    pub collection_name: String,
    pub conn_string: String,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    /// Seconds
    pub idle_timeout: u64,
    /// Seconds
    pub socket_timeout: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfigRequest {
    pub workers_count: u32,
    pub workers_to_add: u32,
    pub increment_load: u32,
    pub producers_count: u32,
    pub msg_by_sec: u32,
    pub time_to_sleep_secs: u32,
    pub time_to_finish_secs: u32,
    pub context_time_out_ms: u64,
    pub query_timeout_ms: u64,
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunStageResponse {
    pub status: String,
    pub campaign_id: Uuid,
}

impl StageRequest {
    fn campaign_config(&self) -> CampaignConfig {
        let stage = &self.stage_config;
        CampaignConfig {
            workers_count: stage.workers_count,
            workers_to_add: stage.workers_to_add,
            increment_load: stage.increment_load,
            producers_count: stage.producers_count,
            msg_by_sec: stage.msg_by_sec,
            time_to_sleep_secs: stage.time_to_sleep_secs,
            time_to_finish_secs: stage.time_to_finish_secs,
            context_timeout_ms: stage.context_time_out_ms,
            query_timeout_ms: stage.query_timeout_ms,
            rng_seed: stage.rng_seed,
        }
    }

    /// Every validation failure, in field order
    pub fn validate(&self) -> Vec<String> {
        let db = &self.db_config;
        let mut result = Vec::new();

        if is_blank(&db.db_name) {
            result.push("Database' name is required".to_string());
        }
        if is_blank(&db.conn_string) {
            result.push("Connection string is required".to_string());
        }
        if is_blank(&db.collection_name) {
            result.push("Collection name is required".to_string());
        } else if TableName::parse(&db.collection_name).is_err() {
            result.push(
                "Collection name must start with a letter or underscore and contain only letters, digits and underscores"
                    .to_string(),
            );
        }
        if db.max_pool_size == 0 {
            result.push("MaxPoolSize is required".to_string());
        } else if db.min_pool_size > db.max_pool_size {
            result.push("MinPoolSize cannot exceed MaxPoolSize".to_string());
        }
        if db.socket_timeout == 0 {
            result.push("Socket' timeout is required".to_string());
        }

        result.extend(self.campaign_config().validation_errors());
        result
    }

    /// Validate and split into store and load configuration
    pub fn into_stage_parts(self) -> Result<(DataStoreConfig, CampaignConfig), AppError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let campaign = self.campaign_config();
        let db = self.db_config;
        let collection_name = TableName::parse(&db.collection_name)
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

        let store = DataStoreConfig {
            db_name: db.db_name.trim().to_string(),
            collection_name,
            conn_string: db.conn_string.trim().to_string(),
            min_pool: db.min_pool_size,
            max_pool: db.max_pool_size,
            idle_timeout: Duration::from_secs(db.idle_timeout),
            socket_timeout: Duration::from_secs(db.socket_timeout),
        };

        Ok((store, campaign))
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/stages", post(run_stage))
        .route("/stages/", post(run_stage))
}

// =========================================================================
// POST /stages
// =========================================================================

/// Validate a campaign description and launch it in the background
async fn run_stage(
    State(state): State<AppState>,
    payload: Result<Json<StageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RunStageResponse>), AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let (store, campaign) = request.into_stage_parts()?;

    tracing::info!(
        db_name = %store.db_name,
        table = %store.collection_name,
        conn_string = %mask_connection_string(&store.conn_string),
        stage_config = ?campaign,
        "Running test stage"
    );

    let stage = Stage::new(store, campaign);
    let campaign_id = stage.id();
    tracing::info!(%campaign_id, "Campaign accepted");

    let factory = Arc::clone(&state.factory);
    tokio::spawn(async move {
        if let Err(e) = stage.run(factory.as_ref()).await {
            tracing::error!(%campaign_id, error = %e, "Campaign aborted");
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(RunStageResponse {
            status: "running".to_string(),
            campaign_id,
        }),
    ))
}
