//! Nimbus - entry point of the serverless emulator.

use std::path::{Path, PathBuf};

use tracing::{error, info};

use nimbus_server::config::DEFAULT_CONFIG_PATH;
use nimbus_server::{init_logging, NimbusConfig, NimbusServer, ServerResult};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("nimbus {}", nimbus_server::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Nimbus - local serverless emulator

USAGE:
    nimbus [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON, default: nimbus.toml)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    NIMBUS_LISTEN_ADDR     Listen address (default: 127.0.0.1)
    NIMBUS_PORT            Listen port (default: 8080)
    NIMBUS_DOMAIN          Domain the api, auth and load balancer hosts live under
    NIMBUS_LOG_LEVEL       Log filter (default: info, RUST_LOG wins)
    NIMBUS_LOG_JSON        Emit JSON logs when set to 1 or true
"
    );
}

fn load_config(path: Option<PathBuf>) -> ServerResult<NimbusConfig> {
    let config = match path {
        Some(path) => NimbusConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            NimbusConfig::from_file(DEFAULT_CONFIG_PATH)?
        }
        None => NimbusConfig::default(),
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logging is configured by the file, so load errors go to stderr.
    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialise logging: {e}");
        std::process::exit(1);
    }

    info!(version = nimbus_server::VERSION, "starting nimbus");

    let server = match NimbusServer::build(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, category = e.category(), "failed to start");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, category = e.category(), "server error");
        std::process::exit(1);
    }
}
