//! Broker server demo
//!
//! Run with: cargo run --example broker_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example broker_server                  # binds to 0.0.0.0:2222
//!   cargo run --example broker_server localhost        # binds to 127.0.0.1:2222
//!   cargo run --example broker_server 127.0.0.1:2223   # binds to 127.0.0.1:2223
//!
//! Pair it with the subject_client demo:
//!   cargo run --example subject_client ws://localhost:2222 chat
//!
//! Any WebSocket client works; frames look like:
//!   ACTION_REGISTER;<id>;<myid>;;chat[-O-]
//!   ;<id>;<myid>;;chat[-O-]{"text":"hello"}

use std::net::SocketAddr;

use pushbus_rs::{BrokerServer, ServerConfig};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:2222
/// - "localhost:2223" -> 127.0.0.1:2223
/// - "127.0.0.1" -> 127.0.0.1:2222
/// - "0.0.0.0:2222" -> 0.0.0.0:2222
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 2222;

    // Replace "localhost" with "127.0.0.1"
    let normalized = arg.replace("localhost", "127.0.0.1");

    // Try parsing as SocketAddr first (includes port)
    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    // Try parsing as IP address without port
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: broker_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:2222)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => "0.0.0.0:2222".parse().unwrap(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pushbus_rs=debug".parse()?)
                .add_directive("broker_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig {
        bind_addr,
        ..ServerConfig::default()
    };

    println!("Starting broker on {}", config.bind_addr);
    println!();
    println!("Connect a client:");
    println!("  cargo run --example subject_client ws://localhost:{} chat", bind_addr.port());
    println!();

    let server = BrokerServer::new(config);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
