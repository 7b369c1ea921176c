//! Deckhand Agent - 持续部署代理
//!
//! Usage:
//! - Normal mode: `deckhand-agent`
//! - With custom port: `deckhand-agent --port 19999`
//!
//! Log level is controlled by `RUST_LOG` (default `deckhand_agent=info,tower_http=info`).

use anyhow::Context;
use deckhand_agent::RuntimeConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "deckhand_agent=info,tower_http=info";

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Deckhand Agent - continuous deployment agent");
    println!();
    println!("USAGE:");
    println!("    deckhand-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    DECKHAND_API_KEY        API key required in the x-api-key header");
    println!("    PORT                    Listening port (default 4303)");
    println!("    PROJECT_DIR             Where the project repository is checked out");
    println!("    DEPLOY_KEY_PATH         SSH key used for git operations");
    println!("    DAEMON_CONTAINER_NAME   Name of the agent's own container");
    println!("    LOG_QUERY_TIMEOUT_SECS  Timeout for non-streaming log queries");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let config = parse_args();
    init_tracing();

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(deckhand_agent::init_and_run_agent_with_config(config))
}
