//! abtutor - Adaptive tutoring A/B backend service
//!
//! Records which of two AI tutoring models a learner preferred after each
//! quiz/practice/code-execution outcome and serves comparative effectiveness
//! statistics between them.

use abtutor_common::{config, TriggerPolicy};
use abtutor_core::{build_router, AppState};
use anyhow::Result;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "abtutor", version, about = "Adaptive tutoring A/B backend")]
struct Args {
    /// Root data folder (overrides ABTUTOR_ROOT and the config file)
    #[arg(long)]
    root_folder: Option<String>,

    /// Port to listen on
    #[arg(long, default_value_t = 5730)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing subscriber before anything that can log
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting abtutor v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), "ABTUTOR_ROOT")?;
    let db_path = config::database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = abtutor_common::db::init_database(&db_path).await?;

    let trigger_policy = TriggerPolicy::load(&pool).await?;
    info!(
        quiz_threshold = trigger_policy.quiz_threshold,
        practice_threshold = trigger_policy.practice_threshold,
        "Loaded engagement trigger policy"
    );

    let state = AppState::new(pool, trigger_policy);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    info!("abtutor listening on http://127.0.0.1:{}", args.port);
    info!("Health check: http://127.0.0.1:{}/health", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
