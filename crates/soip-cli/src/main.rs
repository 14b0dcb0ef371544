use std::sync::Arc;

use soip_cli::cli::{self, CliError};
use soip_link::{Acceptor, DialSpec, Dialer, HandlerRegistry};
use soip_serial::ComDevice;

/// Distinct exit code for a fatal networking failure the top-level wiring
/// could not recover from (the conventional analogue of the original
/// tool's `-1`). Usage errors use the standard `1`.
const NETWORK_FAILURE_EXIT: i32 = 2;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match cli::parse(&args) {
        Ok(config) => config,
        Err(CliError::Usage) => {
            eprintln!("{}", cli::USAGE);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    for link in config.links {
        dial(link);
    }

    match config.acceptor_addr {
        Some(addr) => run_acceptor(&addr, config.acceptor_port),
        None => HandlerRegistry::global().wait_until_empty(),
    }
}

fn dial(spec: DialSpec) {
    let host = spec.host.clone();
    let port = spec.port;
    match Dialer::dial::<ComDevice>(&spec) {
        Ok(handler) => {
            let handler: Arc<dyn soip_link::registry::LinkHandlerDyn> = handler;
            HandlerRegistry::global().register(handler);
        }
        Err(e) => tracing::error!(%host, port, error = %e, "failed to establish outgoing link"),
    }
}

fn run_acceptor(addr: &str, port: u16) {
    match Acceptor::bind((addr, port)) {
        Ok(acceptor) => acceptor.run::<ComDevice>(),
        Err(e) => {
            tracing::error!(%addr, port, error = %e, "failed to bind acceptor address");
            std::process::exit(NETWORK_FAILURE_EXIT);
        }
    }
}
