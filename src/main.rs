use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

use ride_predictor::{
    artifacts::FsArtifactStore,
    config::ServiceConfig,
    server,
    stream::{FileRecordLog, RecordLog},
};

#[derive(Parser)]
#[command(author, version, about = "Ride duration prediction service", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ServiceConfig,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve invocations over HTTP (default)
    Serve,
    /// Handle one invocation event from a JSON file and print the response
    Invoke {
        #[arg(long)]
        event: PathBuf,
    },
    /// Print records published to the predictions stream
    ReadStream {
        #[arg(long, default_value = "shardId-000000000000")]
        shard_id: String,
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    let log = Arc::new(FileRecordLog::new(&config.stream_root, config.stream_shards));

    match cli.command.unwrap_or(Command::Serve) {
        Command::ReadStream { shard_id, from, limit } => {
            let records = log
                .get_records(&config.stream_name, &shard_id, from, limit)
                .with_context(|| format!("failed to read {} from {}", shard_id, config.stream_name))?;
            for r in records {
                let data: serde_json::Value = serde_json::from_slice(&r.data)
                    .with_context(|| format!("record {} is not json", r.sequence_number))?;
                println!(
                    "{}",
                    serde_json::json!({
                        "sequence_number": r.sequence_number,
                        "partition_key": r.partition_key,
                        "data": data,
                    })
                );
            }
        }
        Command::Invoke { event } => {
            let service = build_service(&config, log)?;
            let raw = std::fs::read_to_string(&event)
                .with_context(|| format!("failed to read event at {}", event.display()))?;
            let event: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| "failed to parse event json")?;
            let out = service.handle_value(&event)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Serve => {
            let service = Arc::new(build_service(&config, log)?);
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.port));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!("listening on {} (invocations at {})", addr, server::INVOCATION_PATH);
            server::serve(listener, service).await?;
        }
    }
    Ok(())
}

fn build_service(
    config: &ServiceConfig,
    log: Arc<FileRecordLog>,
) -> anyhow::Result<ride_predictor::ModelService> {
    let store = FsArtifactStore::new(&config.artifact_root);
    let service = ride_predictor::init(config, &store, log).with_context(|| {
        format!(
            "failed to initialise model service for run {} / model {}",
            config.run_id, config.model_id
        )
    })?;
    tracing::info!(
        "serving run {} model {} (test run: {}, sinks: {})",
        service.run_id(),
        service.model_id(),
        service.test_run(),
        service.sink_count()
    );
    Ok(service)
}
