//! Dev-harness binary
//!
//! Wires config, logging, the rule library, and the tool registry together,
//! then dispatches a single tool invocation from the command line. The
//! production transport (JSON-RPC over stdio) lives outside this crate and
//! binds to the same [`ToolRegistry`] surface.

use clap::Parser;
use starrocks_doctor::services::probe::MysqlProbe;
use starrocks_doctor::services::rules;
use starrocks_doctor::{Config, ToolRegistry};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "starrocks-doctor", about = "StarRocks diagnostic engine", version)]
struct Cli {
    /// List registered tools grouped by expert and exit
    #[arg(long)]
    list_tools: bool,

    /// Tool to invoke
    #[arg(long)]
    tool: Option<String>,

    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    args: String,

    /// Print the structured JSON response instead of the text report
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load()?;
    init_tracing(&config);

    rules::init(&config.rules);
    let registry = ToolRegistry::build(&config)?;

    if cli.list_tools {
        for (expert, specs) in registry.list_by_expert() {
            println!("{}", expert);
            for spec in specs {
                println!("  {:<28} {}", spec.name, spec.description);
            }
        }
        return Ok(());
    }

    let Some(tool) = cli.tool else {
        anyhow::bail!("either --list-tools or --tool <name> is required");
    };
    let args: serde_json::Value = serde_json::from_str(&cli.args)
        .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {}", e))?;

    let probe = Arc::new(MysqlProbe::connect(&config.cluster));
    let result = registry.dispatch(&tool, &args, probe.clone()).await;

    // The probe is scoped to this invocation; release it on every exit path.
    if let Ok(probe) = Arc::try_unwrap(probe).map_err(|_| ()) {
        probe.close().await;
    }

    let response = result?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", response.report);
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match &config.logging.file {
        Some(path) => {
            let appender = tracing_appender::rolling::daily(".", path);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(appender).with_ansi(false))
                .init();
        },
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        },
    }
}
