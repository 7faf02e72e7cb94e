use anyhow::Result;
use clap::Parser;
use model_garden::{config::Config, web::serve};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "model-garden")]
#[command(about = "Serve named ONNX classifiers behind one prediction API")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Override the port of the bind address
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// TOML file with server, ONNX and model settings
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Model directory path (overrides the config file, defaults to ./models)
    #[arg(long)]
    models_dir: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Abort startup if any model fails to load
    #[arg(long)]
    strict: bool,

    /// Sessions kept per model for parallel inference
    #[arg(long)]
    sessions_per_model: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let bind = match args.port {
        Some(port) => {
            let host = args.bind.rsplit_once(':').map(|(host, _)| host).unwrap_or("0.0.0.0");
            format!("{}:{}", host, port)
        }
        None => args.bind,
    };

    tracing::info!("Starting model garden service...");
    tracing::info!("Bind address: {}", bind);

    let mut config = Config::new(bind, args.models_dir, args.config, args.strict)?;
    if let Some(sessions) = args.sessions_per_model {
        config.onnx_config.sessions_per_model = sessions;
    }
    tracing::info!("Models directory: {}", config.models_dir.display());

    for descriptor in &config.models {
        tracing::info!(
            "Configured model: {} v{} ({:?}, {} classes)",
            descriptor.name,
            descriptor.version,
            descriptor.framework,
            descriptor.classes.len()
        );
    }

    serve(config).await?;

    Ok(())
}
