use anyhow::{Context, Result};
use clap::Parser;

use pay_flow::cli::{Cli, Command, default_data_dir};
use pay_flow::context::RequestContext;
use pay_flow::platform::{PendingBackend, Platform, PlatformConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;

    match cli.command {
        Command::Serve {
            host,
            port,
            data_dir,
            redis_url,
            pending_backend,
        } => {
            let backend = match pending_backend.as_str() {
                "memory" => PendingBackend::Memory,
                "jwt" => PendingBackend::Jwt,
                "redis" => PendingBackend::Redis,
                other => anyhow::bail!("unknown pending backend '{other}'"),
            };
            let mut config = PlatformConfig::new(data_dir.unwrap_or_else(default_data_dir));
            config.redis_url = redis_url.or_else(|| std::env::var("REDIS_URL").ok());
            config.pending_backend = backend;

            rt.block_on(async {
                let platform = Platform::initialize(config).await?;
                pay_flow::api::serve(platform, &host, port).await
            })
        }

        Command::Reconcile { data_dir, database } => {
            let data_dir = data_dir.unwrap_or_else(default_data_dir);
            rt.block_on(async {
                let router = pay_flow::db::DbRouter::new(data_dir.clone());
                for name in database_names(&data_dir, database)? {
                    let handle = router
                        .open(&name)
                        .await
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    let report = {
                        let conn = handle.db.lock().await;
                        pay_flow::ledger::reconcile::reconcile(&conn)
                            .map_err(|e| anyhow::anyhow!("{e}"))?
                    };
                    println!("── {name} ──");
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    if report.clean() {
                        println!("No drift.");
                    }
                }
                Ok(())
            })
        }

        Command::Sweep { data_dir, database } => {
            let data_dir = data_dir.unwrap_or_else(default_data_dir);
            rt.block_on(async {
                let platform =
                    Platform::initialize(PlatformConfig::new(data_dir.clone())).await?;
                let ctx = RequestContext::internal();
                for name in database_names(&data_dir, database)? {
                    let handle = platform
                        .router
                        .open(&name)
                        .await
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    let released = platform
                        .ledger
                        .sweep_expired_holds(&handle)
                        .await
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    let expired = platform
                        .bonus
                        .expire_due(&handle, &ctx)
                        .await
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    println!(
                        "{name}: released {released} holds, expired {} bonuses",
                        expired.len()
                    );
                }
                platform.shutdown().await;
                Ok(())
            })
        }

        Command::Schema => {
            let schema = pay_flow::api::handlers::schema::schema_json();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

/// Explicit database, or every SQLite file under the data dir.
fn database_names(
    data_dir: &std::path::Path,
    database: Option<String>,
) -> Result<Vec<String>> {
    if let Some(name) = database {
        return Ok(vec![name]);
    }
    let mut names = Vec::new();
    if data_dir.exists() {
        for entry in std::fs::read_dir(data_dir)
            .with_context(|| format!("reading {}", data_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "db") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
    }
    names.sort();
    Ok(names)
}
