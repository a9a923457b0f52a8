use anyhow::{bail, Context};
use fallbacks::{config::FallbacksConfig, init_tracing, CircuitBreakerRegistry};
use std::env;
use std::process;

const USAGE: &str = "Usage: fallbacks <config_file> [status | reset <name>]";

#[tokio::main]
async fn main() {
    // Initialize tracing
    init_tracing();

    if let Err(e) = run(env::args().skip(1).collect()).await {
        eprintln!("Error: {:#}", e);
        eprintln!("{}", USAGE);
        process::exit(1);
    }
}

async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let Some(config_path) = args.first() else {
        bail!("missing config file");
    };

    let config = FallbacksConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    let registry = CircuitBreakerRegistry::from_config(&config).await?;

    match args.get(1).map(String::as_str) {
        None | Some("status") => {
            let status: Vec<_> = registry
                .all_status()
                .await?
                .into_iter()
                .map(|(name, status)| serde_json::json!({ "name": name, "circuit": status }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Some("reset") => {
            let Some(name) = args.get(2) else {
                bail!("reset needs a circuit breaker name");
            };
            registry.reset(name).await?;
            println!("Circuit {} reset", name);
        }
        Some(other) => bail!("unknown command: {}", other),
    }

    Ok(())
}
