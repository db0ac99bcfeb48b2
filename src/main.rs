//! Networked register VM server.
//!
//! Binds a TCP listener and serves every client from one shared VM until
//! interrupted with Ctrl+C.
//!
//! # Usage
//! ```text
//! rvm [listen_addr] [OPTIONS]
//! ```
//!
//! # Arguments
//! - `listen_addr`: Local address to bind (defaults to `127.0.0.1:8080`)
//!
//! # Options
//! - `--slice <n>`: Instructions a running program executes per turn
//! - `--max-connections <n>`: Connections accepted at the same time
//! - `--log <level>`: Minimum log level (overrides `RVM_LOG`)

use rvm::network::server::{Server, ServerConfig};
use rvm::utils::log::{self, Level};
use rvm::{error, info};
use std::env;
use std::process;
use std::str::FromStr;
use tokio::sync::oneshot;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let (program, rest) = split_program(&args);

    if rest.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_usage(program);
        process::exit(0);
    }

    log::init_from_env();

    let config = match parse_args(rest) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            print_usage(program);
            process::exit(1);
        }
    };

    let server = match Server::bind(config.clone()).await {
        Ok(server) => server,
        Err(err) => {
            error!("failed to bind {}: {err}", config.listen_addr);
            process::exit(1);
        }
    };
    info!(
        "slice budget {} instructions, at most {} connections",
        config.slice_budget, config.max_connections
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(());
            }
            Err(err) => {
                error!("cannot listen for Ctrl+C: {err}");
                // Keep the sender alive so the server is not shut down.
                std::future::pending::<()>().await;
            }
        }
    });

    let vm = server.run(shutdown_rx).await;
    info!(
        "final state: {} instruction(s), R0 = {}",
        vm.program().len(),
        vm.result()
    );
}

/// Splits argv into the program name and the remaining arguments. An empty
/// argv falls back to the binary's own name.
fn split_program(args: &[String]) -> (&str, &[String]) {
    match args.split_first() {
        Some((program, rest)) => (program.as_str(), rest),
        None => ("rvm", &[]),
    }
}

/// Builds the server configuration from the arguments after the program name.
fn parse_args(args: &[String]) -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default();
    let mut listen_set = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            flag @ ("--slice" | "--max-connections" | "--log") => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| format!("{flag} requires an argument"))?;
                match flag {
                    "--slice" => config.slice_budget = parse_number(flag, value)?,
                    "--max-connections" => config.max_connections = parse_number(flag, value)?,
                    _ => log::set_level(Level::from_str(value)?),
                }
            }
            other if other.starts_with('-') => return Err(format!("unknown option: {other}")),
            addr if !listen_set => {
                config.listen_addr = addr
                    .parse()
                    .map_err(|_| format!("invalid listen address: {addr}"))?;
                listen_set = true;
            }
            extra => return Err(format!("unexpected argument: {extra}")),
        }
        i += 1;
    }

    if config.slice_budget == 0 {
        return Err("--slice must be at least 1".to_string());
    }
    if config.max_connections == 0 {
        return Err("--max-connections must be at least 1".to_string());
    }
    Ok(config)
}

fn parse_number<T: FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a positive number, got '{value}'"))
}

const USAGE: &str = "\
Networked register VM server

USAGE:
    {program} [listen_addr] [OPTIONS]

ARGS:
    [listen_addr]    Local address to bind (default: 127.0.0.1:8080)

OPTIONS:
    --slice <n>              Instructions a running program executes per turn (default: 256)
    --max-connections <n>    Connections accepted at the same time (default: 1024)
    --log <level>            Minimum log level: debug, info, warn, error
    -h, --help               Print this help message

ENVIRONMENT:
    RVM_LOG    Minimum log level when --log is not given

EXAMPLES:
    # Serve on the default address
    {program}

    # Serve on all interfaces with short slices and debug logging
    {program} 0.0.0.0:9000 --slice 32 --log debug
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
