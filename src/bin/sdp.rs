//! peerproxy SDP tool
//!
//! Usage: peerproxy-sdp [OPTIONS] < offer.sdp
//!
//! Options:
//!   -f, --filter                 Strip every candidate line
//!   -l, --list                   List host candidate endpoints
//!   -r, --relay <ADDR> <PORT>    Point host candidates at a relay
//!   --generate-config            Print a default proxy configuration
//!   --check-config <FILE>        Validate a proxy configuration file
//!   -h, --help                   Print help information

use std::env;
use std::io::{self, Read};

use anyhow::{bail, Context};

use peerproxy::net::Endpoint;
use peerproxy::obfuscation::{filter_candidates_from_sdp, host_endpoints, redirect_host_candidates};
use peerproxy::server::{ProxyConfig, ProxyConfigFile};

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays a clean SDP body
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "-f" | "--filter" => {
            print!("{}", filter_candidates_from_sdp(&read_stdin()?));
        }
        "-l" | "--list" => {
            for endpoint in host_endpoints(&read_stdin()?) {
                println!("{}", endpoint);
            }
        }
        "-r" | "--relay" => {
            if args.len() < 4 {
                bail!("--relay requires an address and a port");
            }
            let port: u16 = args[3]
                .parse()
                .with_context(|| format!("invalid port {:?}", args[3]))?;
            let relay = Endpoint::new(args[2].as_str(), port);

            tracing::info!("redirecting host candidates to {}", relay);
            print!("{}", redirect_host_candidates(&read_stdin()?, &relay));
        }
        "--generate-config" => {
            let file = ProxyConfigFile::from_config(&ProxyConfig::default());
            println!("# peerproxy configuration");
            println!();
            print!("{}", file.to_toml()?);
        }
        "--check-config" => {
            if args.len() < 3 {
                bail!("--check-config requires a file path");
            }
            check_config(&args[2])?;
        }
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"peerproxy-sdp - SDP candidate filtering and rewriting

USAGE:
    peerproxy-sdp [OPTIONS] < offer.sdp

OPTIONS:
    -f, --filter                Strip every candidate line
    -l, --list                  List host candidate endpoints
    -r, --relay <ADDR> <PORT>   Point host candidates at a relay
    --generate-config           Print a default proxy configuration
    --check-config <FILE>       Validate a proxy configuration file
    -h, --help                  Print help information

EXAMPLES:
    Hide local addresses from an offer:
        peerproxy-sdp --filter < offer.sdp

    Route the connection through a relay:
        peerproxy-sdp --relay 198.51.100.7 3478 < offer.sdp
"#
    );
}

fn read_stdin() -> anyhow::Result<String> {
    let mut sdp = String::new();
    io::stdin()
        .read_to_string(&mut sdp)
        .context("reading SDP from stdin")?;
    Ok(sdp)
}

fn check_config(path: &str) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let config = ProxyConfigFile::from_toml(&content)?.to_config()?;

    println!("allow_non_unicast: {}", config.allow_non_unicast);
    println!("connect_timeout: {:?}", config.connect_timeout);
    println!("close_timeout: {:?}", config.close_timeout);
    match config.snapshot_interval {
        Some(interval) => println!("snapshot_interval: {:?}", interval),
        None => println!("snapshot_interval: off"),
    }
    Ok(())
}
