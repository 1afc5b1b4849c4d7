//! onionlink daemon binary.
//!
//! Loads configuration, materializes the router identity and transport
//! key, binds the UDP endpoint, and runs the link layer manager over the
//! built-in datagram engine until interrupted. Reassembled link messages
//! are logged; a full router embeds the library and supplies its own
//! upstream dispatch (and, across real networks, a uTP-style engine).

use clap::Parser;
use onionlink::link::manager::{now_unix_ms, run_link_loop};
use onionlink::{
    AddressInfo, Config, DatagramEngine, LinkManager, LinkUpstream, LocalIdentity, RouterContact,
    SecretKey, UdpEndpoint,
};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Secure link layer node
#[derive(Parser, Debug)]
#[command(name = "onionlink", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Upstream hooks for a standalone node: log what the link layer delivers.
struct LogUpstream;

impl LinkUpstream for LogUpstream {
    fn handle_link_message(&mut self, from: &RouterContact, msg: &[u8]) -> bool {
        info!(router_id = %from.router_id, bytes = msg.len(), "link message received");
        true
    }

    fn session_established(&mut self, rc: &RouterContact) {
        info!(router_id = %rc.router_id, "peer session ready");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    info!("onionlink starting");

    let (config, loaded_paths) = if let Some(path) = &args.config {
        match Config::load_file(path) {
            Ok(config) => (config, vec![path.clone()]),
            Err(e) => {
                error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        }
    };
    if loaded_paths.is_empty() {
        info!("no config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "loaded config");
        }
    }

    let identity = match LocalIdentity::load_or_generate(
        &config.node.signing_key_path(),
        &config.node.encryption_key_path(),
    ) {
        Ok(identity) => identity,
        Err(e) => {
            error!(error = %e, "failed to load identity");
            std::process::exit(1);
        }
    };
    info!(router_id = %identity.router_id(), "identity ready");

    let bind_addr = match config.udp.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid bind address");
            std::process::exit(1);
        }
    };
    let (endpoint, mut datagrams) = match UdpEndpoint::bind(bind_addr, 1024).await {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "failed to bind udp endpoint");
            std::process::exit(1);
        }
    };

    let transport_secret = SecretKey::generate();
    let rc = RouterContact::new_signed(
        &identity,
        vec![AddressInfo {
            rank: 1,
            transport_pubkey: transport_secret.public(),
            addr: endpoint.local_addr(),
        }],
        now_unix_ms(),
    );
    info!(
        local_addr = %endpoint.local_addr(),
        transport_key = %transport_secret.public(),
        contact_bytes = rc.encode().len(),
        "link layer ready"
    );

    let mut manager = LinkManager::new(
        DatagramEngine::new(),
        rc,
        identity.encryption_secret().clone(),
        transport_secret,
        config.link.options(),
        now_unix_ms(),
    );
    let mut upstream = LogUpstream;

    tokio::select! {
        _ = run_link_loop(&mut manager, &endpoint, &mut datagrams, &mut upstream) => {
            info!("link loop ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }
    manager.stop();
}
