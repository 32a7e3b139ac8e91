use std::sync::Arc;

use clap::Parser;
use quizmill_core::QuizmillConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use quizmill_server::http;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "quizmill.toml")]
    config: String,

    #[arg(long)]
    health: bool,

    /// Run with the in-process store instead of Postgres.
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match QuizmillConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let state = if args.memory {
        tracing::warn!("Using in-process store; data will not survive a restart");
        Arc::new(http::HttpState::memory())
    } else {
        let pool = match quizmill_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };

        if args.health {
            match quizmill_core::db::health_check(&pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            }
            println!("✅ Quizmill DB health check passed");
            return Ok(());
        }

        Arc::new(http::HttpState::postgres(pool))
    };

    if !config.http.enabled {
        eprintln!("http.enabled is false; nothing to serve");
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, &config.http.host, config.http.port, tx.subscribe()).await?;

    Ok(())
}
