//! rendezvous-ctl: command-line interface for the rendezvous broker.

mod cmd;

use anyhow::{Context, Result};

use rendezvous_core::config::RendezvousConfig;

fn print_usage(default_broker: &str) {
    println!("Usage: rendezvous-ctl [--broker <url>] <command>");
    println!();
    println!("Commands:");
    println!("  tunnel <local_port> <prefix>   Expose http://127.0.0.1:<local_port> under <prefix>");
    println!("  bind <prefix> [address]        Bind <prefix> to live workers, print tunnel endpoints");
    println!("  query <prefix> <subpath>       GET <subpath> from the application behind <prefix>");
    println!("  status                         Show broker node status");
    println!();
    println!("Options:");
    println!("  --broker <url>   Broker base URL (default: {})", default_broker);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RendezvousConfig::load().unwrap_or_default();
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --broker option
    let mut broker = config.agent.broker_url.clone();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--broker" {
            i += 1;
            broker = args.get(i).context("--broker requires a value")?.clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }
    let broker = broker.trim_end_matches('/').to_string();

    match remaining.as_slice() {
        ["tunnel", port, prefix] => cmd::tunnel::cmd_tunnel(&broker, port, prefix, &config.agent).await,
        ["bind", prefix] => cmd::bind::cmd_bind(&broker, prefix, "cli").await,
        ["bind", prefix, address] => cmd::bind::cmd_bind(&broker, prefix, address).await,
        ["query", prefix, subpath] => cmd::query::cmd_query(&broker, prefix, subpath).await,
        ["status"] | [] => cmd::status::cmd_status(&broker).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage(&config.agent.broker_url);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage(&config.agent.broker_url);
            std::process::exit(1);
        }
    }
}
