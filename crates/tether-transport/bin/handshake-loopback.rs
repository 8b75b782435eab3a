//! Runs a full handshake between two in-process registries over a loopback link.
//!
//! Reads configuration from environment variables:
//! - `TETHER_TOKEN`: identity token presented by the initiator (default `user-123`)
//! - `TETHER_LOSS`: drop probability applied to both directions (default `0.0`)
//! - `TETHER_SEED`: loss RNG seed (default `1`)
//! - `TETHER_CONFIG`: optional TOML configuration file
//! - `RUST_LOG`: log filter (default `info`)

use std::env;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    LinkState, PeerEvent, PeerSessionRegistry, Role, SessionVerifier, StaticCredentials,
    TetherConfig,
};
use tether_crypto::OsCryptoProvider;
use tether_transport::{LoopbackLink, LossModel};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(50);

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, Box<dyn Error>>
where
    T::Err: Error + 'static,
{
    match env::var(name) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let token = env::var("TETHER_TOKEN").unwrap_or_else(|_| "user-123".to_string());
    let loss: f64 = env_or("TETHER_LOSS", 0.0)?;
    let seed: u64 = env_or("TETHER_SEED", 1)?;
    let config = match env::var("TETHER_CONFIG") {
        Ok(path) => TetherConfig::from_file(path)?,
        Err(_) => TetherConfig::default(),
    };

    info!(loss, seed, auth = config.enable_auth, "starting loopback handshake");

    let crypto = Arc::new(OsCryptoProvider);
    let mut host = PeerSessionRegistry::new(config.clone(), crypto.clone())?
        .with_verifier(Arc::new(SessionVerifier::auto_accept()));
    let mut client = PeerSessionRegistry::new(config.clone(), crypto)?
        .with_credentials(Arc::new(StaticCredentials::new(token)));

    let link = LoopbackLink::new("host", host.task_sender(), "client", client.task_sender());
    let (host_sink, client_sink) = link.sinks();
    let model = |offset: u64| LossModel::Random {
        rate: loss,
        seed: seed.wrapping_add(offset),
    };

    let host_handle =
        host.connect("client", Role::Responder, Box::new(host_sink.with_loss(model(0))))?;
    let client_handle =
        client.connect("host", Role::Initiator, Box::new(client_sink.with_loss(model(1))))?;
    link.announce(LinkState::Connected);

    let budget = config.resend_interval() * (config.max_resends + 2);
    let mut elapsed = Duration::ZERO;
    let mut connected = (false, false);
    while elapsed < budget && connected != (true, true) {
        host.tick(TICK);
        client.tick(TICK);
        elapsed += TICK;

        for (side, registry) in [(0, &mut host), (1, &mut client)] {
            while let Some(event) = registry.poll_event() {
                match event {
                    PeerEvent::Connected { identity, .. } => {
                        info!(%identity, ?elapsed, "peer connected");
                        if side == 0 {
                            connected.0 = true;
                        } else {
                            connected.1 = true;
                        }
                    }
                    PeerEvent::Disconnected {
                        identity, reason, ..
                    } => {
                        warn!(%identity, ?reason, "peer disconnected");
                        return Err(format!("{} disconnected: {:?}", identity, reason).into());
                    }
                }
            }
        }
    }

    if connected != (true, true) {
        return Err(format!("handshake did not complete within {:?}", budget).into());
    }

    client.send(client_handle, b"ping")?;
    for _ in 0..config.max_resends.max(1) {
        host.tick(TICK);
        if let Some(payload) = host.recv(host_handle) {
            info!(payload = %String::from_utf8_lossy(&payload), "application payload received");
            return Ok(());
        }
    }

    warn!("application payload lost");
    Ok(())
}
