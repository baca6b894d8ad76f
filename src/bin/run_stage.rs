//! Run a single campaign in the foreground
//!
//! Run with: cargo run --bin run_stage --release -- --config campaign.json
//!
//! The file uses the same JSON shape as `POST /stages`.

use std::path::PathBuf;

use clap::Parser;
use pool_stage::api::routes::StageRequest;
use pool_stage::config::{LogFormat, StoreBackend};
use pool_stage::repository::{InMemoryRepositoryFactory, PgStoreRepositoryFactory};
use pool_stage::{telemetry, RepositoryFactory, Stage};

#[derive(Debug, Parser)]
#[command(name = "run_stage", about = "Run one load campaign and print its report")]
struct Args {
    /// Campaign description (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Store backend: postgres or memory
    #[arg(long, env = "STORE_BACKEND", default_value = "postgres")]
    backend: String,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    telemetry::init_tracing(LogFormat::Pretty);

    let backend: StoreBackend = args
        .backend
        .parse()
        .map_err(|_| anyhow::anyhow!("Unknown store backend: {}", args.backend))?;

    let raw = std::fs::read_to_string(&args.config)?;
    let request: StageRequest = serde_json::from_str(&raw)?;
    let (store, campaign) = request.into_stage_parts()?;

    let factory: Box<dyn RepositoryFactory> = match backend {
        StoreBackend::Postgres => Box::new(PgStoreRepositoryFactory),
        StoreBackend::Memory => Box::new(InMemoryRepositoryFactory::new()),
    };

    let report = Stage::new(store, campaign).run(factory.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Campaign Results ===");
    println!("Campaign: {}", report.campaign_id);
    println!("Tokens enqueued: {}", report.tokens_enqueued);
    println!("Reads completed: {}", report.reads_completed);
    println!("Queries: {}", report.query_count);
    println!("Errors: {}", report.error_count);
    println!("Latency: {}", report.latency);
    println!("Pool: {}", report.pool);
    println!("Workers per step: {:?}", report.worker_counts);
    println!(
        "Time: {:.2}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );

    Ok(())
}
