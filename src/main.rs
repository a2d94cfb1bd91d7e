use ai_request_manager::config::Args;
use ai_request_manager::{ManagerEvent, RequestError, metrics, spawn};
use clap::Parser;
use std::collections::HashSet;
use std::io::Write;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logs go to stderr, stdout is for the response text
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ai_request_manager=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let args = Args::parse();
    let settings = args.settings();

    info!(
        model = %settings.model,
        endpoint = %settings.endpoint,
        rate_limit = settings.max_requests_per_minute,
        cache_size = settings.max_cache_size,
        "Starting ai-request-manager v{}",
        env!("CARGO_PKG_VERSION")
    );
    if settings.api_key.is_empty() {
        warn!("no API key given (--api-key or ANTHROPIC_API_KEY)");
    }

    let (handle, mut events, _task) = spawn(settings)?;

    let mut pending = HashSet::new();
    for prompt in &args.prompts {
        let id = handle.queue_request(prompt.as_str(), args.system.as_str()).await?;
        pending.insert(id);
    }

    let mut failed = 0usize;
    let mut stdout = std::io::stdout();

    while !pending.is_empty() {
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            ManagerEvent::Queued { id, depth } => info!(%id, depth, "queued"),
            ManagerEvent::Started { id } => info!(%id, "started"),
            ManagerEvent::Chunk { text, .. } => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            ManagerEvent::Completed { id, cached, .. } => {
                writeln!(stdout)?;
                info!(%id, cached, "completed");
                pending.remove(&id);
            }
            // not terminal - the request is still queued and the sweep retries it
            ManagerEvent::Error {
                id,
                error: error @ RequestError::RateLimited { .. },
            } => warn!(%id, %error, "waiting for rate limit window"),
            ManagerEvent::Error { id, error } => {
                eprintln!("error: {}", error);
                failed += 1;
                pending.remove(&id);
            }
        }
    }

    if args.metrics {
        eprint!("{}", metrics::render());
    }

    if failed > 0 {
        return Err(format!("{} of {} requests failed", failed, args.prompts.len()).into());
    }
    Ok(())
}
