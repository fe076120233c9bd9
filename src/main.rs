//! `http-ingress` server binary.
//!
//! Serves a built-in echo handler that reports what the pipeline decoded,
//! which makes it handy for poking at framing and TLS setups with curl.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;

use http_ingress::config::{load_config, ServerConfig};
use http_ingress::http::Body;
use http_ingress::lifecycle::startup;
use http_ingress::observability::logging::init_logging;
use http_ingress::{DecodedRequest, HandlerError, ResponseSpec};

#[derive(Debug, Parser)]
#[command(name = "http-ingress", version, about = "HTTP/1.x ingestion server")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        max_connections = config.listener.max_connections,
        idle_secs = config.timeouts.idle_secs,
        "http-ingress starting"
    );

    match startup::run(config, echo).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn echo(request: DecodedRequest) -> Result<ResponseSpec, HandlerError> {
    let message = request.message();
    let body = match request.body() {
        Ok(Body::Empty) => json!(null),
        Ok(Body::Json(value)) => value.clone(),
        Ok(Body::Form(pairs)) => json!(pairs),
        Ok(Body::Text(text)) => json!(text),
        Ok(Body::Bytes(bytes)) => json!({ "bytes": bytes.len() }),
        Err(e) => json!({ "decode_error": e.to_string() }),
    };
    let headers: Vec<_> = message.headers().iter().collect();

    let report = json!({
        "request_id": request.id(),
        "peer_addr": request.peer_addr().to_string(),
        "method": message.method(),
        "target": message.target(),
        "version": message.version().as_str(),
        "headers": headers,
        "body": body,
    });
    Ok(ResponseSpec::json(200, &report)?)
}
