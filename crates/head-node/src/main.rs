//! Head Node - headless multiplayer participant
//!
//! Runs a protocol engine against a head coordinator in client, server or
//! dedicated mode. Received packets and lifecycle events are logged; an
//! optional synthetic stream stands in for a game engine.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use head_codec::GameState;
use head_multiplayer::{
    EngineConfig, EngineExit, GameEngine, LifecycleHooks, PacketSender, ProtocolEngineBuilder,
    TICS_PER_SECOND,
};
use head_session::{Session, SessionConfig};
use head_tx::{ClientKeySet, NativeScript};
use head_types::{Network, PeerIndex, TxId};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{parse_key_hash, parse_network, Mode, NodeConfig};

#[derive(Parser, Debug)]
#[command(name = "head-node")]
#[command(about = "Multiplayer participant on a head state channel", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a head and run the protocol engine
    Run(RunArgs),
    /// Generate a session key
    Keygen {
        /// Where to write the key envelope
        #[arg(long, default_value = "session.skey")]
        out: PathBuf,

        #[arg(long, value_parser = parse_network, default_value = "testnet")]
        network: Network,
    },
    /// Print the addresses of a session key
    Address {
        #[arg(long)]
        key_file: PathBuf,

        /// Also print the lobby multisig address shared with this admin
        #[arg(long)]
        admin_key_hash: Option<String>,

        #[arg(long, value_parser = parse_network, default_value = "testnet")]
        network: Network,
    },
}

/// Flags override the config file
#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Coordinator URL
    #[arg(long)]
    node_url: Option<String>,

    #[arg(long)]
    key_file: Option<PathBuf>,

    #[arg(long)]
    peer_index: Option<PeerIndex>,

    #[arg(long)]
    admin_key_hash: Option<String>,

    #[arg(long)]
    address_filter: Option<String>,

    /// Synthetic packets per second
    #[arg(long)]
    synthetic_rate: Option<u32>,

    #[arg(long)]
    synthetic_to: Option<PeerIndex>,

    #[arg(long, value_parser = parse_network)]
    network: Option<Network>,
}

impl RunArgs {
    fn resolve(self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(url) = self.node_url {
            config.node_url = url;
        }
        if self.key_file.is_some() {
            config.key_file = self.key_file;
        }
        if let Some(index) = self.peer_index {
            config.peer_index = index;
        }
        if self.admin_key_hash.is_some() {
            config.admin_key_hash = self.admin_key_hash;
        }
        if self.address_filter.is_some() {
            config.address_filter = self.address_filter;
        }
        if self.synthetic_rate.is_some() {
            config.synthetic_rate = self.synthetic_rate;
        }
        if let Some(to) = self.synthetic_to {
            config.synthetic_to = to;
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        Ok(config)
    }
}

/// Stand-in game engine
struct LoggingGame {
    received: u64,
}

impl GameEngine for LoggingGame {
    fn receive_packet(&mut self, from: PeerIndex, data: &[u8]) {
        self.received += 1;
        tracing::debug!(
            "Packet #{} from peer {} ({} bytes)",
            self.received,
            from,
            data.len()
        );
    }
}

struct LoggingHooks;

impl LifecycleHooks for LoggingHooks {
    fn on_new_game(
        &mut self,
        game_id: TxId,
        player_count: u64,
        bot_count: u64,
        _first_ephemeral_key: Option<&[u8]>,
    ) {
        tracing::info!(
            "New game {}: {} players, {} bots",
            game_id.to_hex(),
            player_count,
            bot_count
        );
    }

    fn on_player_join(&mut self, game_id: TxId, ephemeral_keys: &[Vec<u8>]) {
        tracing::info!(
            "Game {}: {} players joined",
            game_id.to_hex(),
            ephemeral_keys.len()
        );
    }

    fn on_game_state(&mut self, game_id: TxId, state: GameState) {
        tracing::info!("Game {} entered {:?}", game_id.to_hex(), state);
    }

    fn on_disagreement(&mut self, a: PeerIndex, b: PeerIndex) {
        tracing::warn!("Peers {} and {} disagree on kills", a, b);
    }

    fn on_tx_invalid(&mut self, tx_id: TxId) {
        tracing::warn!("Own unit {} rejected", tx_id.to_hex());
    }

    fn on_disconnect(&mut self) {
        tracing::warn!("Coordinator connection lost");
    }
}

/// Send one packet per period until the engine stops listening
async fn synthetic_stream(sender: PacketSender, from: PeerIndex, to: PeerIndex, rate: u32) {
    let rate = u64::from(rate.clamp(1, TICS_PER_SECOND as u32));
    let mut interval = tokio::time::interval(Duration::from_millis(1000 / rate));
    let mut frame: u64 = 0;
    loop {
        interval.tick().await;
        if !sender.send_packet(to, from, &[], &frame.to_be_bytes()) {
            break;
        }
        frame += 1;
    }
}

fn load_keys(config: &NodeConfig) -> Result<ClientKeySet> {
    match &config.key_file {
        Some(path) => ClientKeySet::load(path, config.network)
            .with_context(|| format!("loading key {}", path.display())),
        None => {
            tracing::warn!("No key file configured, using a throwaway session key");
            Ok(ClientKeySet::generate(config.network))
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = args.resolve()?;
    let role = config.role()?;
    let keys = load_keys(&config)?;

    tracing::info!("===========================================");
    tracing::info!("  Head Node - {:?} mode", config.mode);
    tracing::info!("===========================================");
    tracing::info!("Coordinator: {}", config.node_url);
    tracing::info!("Peer index: {}", config.peer_index);
    tracing::info!("Key address: {}", keys.address().to_bech32()?);

    let session = Session::connect(SessionConfig {
        node_url: config.node_url.clone(),
        address_filter: config.address_filter.clone(),
        ..Default::default()
    })
    .await?;

    let mut engine = ProtocolEngineBuilder::new()
        .config(EngineConfig {
            peer_index: config.peer_index,
            disagreement_window: config.disagreement_window,
            min_value: config.min_value,
            halt_on_disagreement: config.mode == Mode::Dedicated,
            ..Default::default()
        })
        .role(role)
        .keys(keys)
        .session(session)
        .game(LoggingGame { received: 0 })
        .hooks(LoggingHooks)
        .build()?;

    // Held until shutdown so the run loop does not see the channel close
    let sender = engine.packet_sender();
    if let (Some(rate), Some(sender)) = (config.synthetic_rate, sender.clone()) {
        tracing::info!(
            "Sending {} synthetic packets/s to peer {}",
            rate,
            config.synthetic_to
        );
        tokio::spawn(synthetic_stream(
            sender,
            config.peer_index,
            config.synthetic_to,
            rate,
        ));
    }

    let exit = tokio::select! {
        exit = engine.run() => Some(exit),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            None
        }
    };
    drop(sender);

    let stats = engine.stats();
    let summary = engine.session().timings().summary();
    tracing::info!(
        "Submitted {} units carrying {} packets, delivered {}, {} rejected",
        stats.units_submitted,
        stats.packets_sent,
        stats.packets_delivered,
        stats.invalid_units
    );
    tracing::info!(
        "Latency: seen {:?} ({}), confirmed {:?} ({})",
        summary.mean_seen,
        summary.seen,
        summary.mean_confirmed,
        summary.confirmed
    );

    Ok(match exit {
        Some(EngineExit::Disagreement { a, b }) => {
            tracing::error!("Halting: peers {} and {} disagree", a, b);
            ExitCode::FAILURE
        }
        Some(EngineExit::Disconnected) if config.mode == Mode::Dedicated => {
            tracing::error!("Coordinator disconnected");
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    })
}

fn keygen(out: PathBuf, network: Network) -> Result<()> {
    let keys = ClientKeySet::generate(network);
    keys.write(&out)
        .with_context(|| format!("writing key {}", out.display()))?;
    println!("key file:  {}", out.display());
    println!("address:   {}", keys.address().to_bech32()?);
    println!("key hash:  {}", hex::encode(keys.key_hash()));
    Ok(())
}

fn address(key_file: PathBuf, admin_key_hash: Option<String>, network: Network) -> Result<()> {
    let keys = ClientKeySet::load(&key_file, network)
        .with_context(|| format!("loading key {}", key_file.display()))?;
    println!("address:   {}", keys.address().to_bech32()?);
    println!("key hash:  {}", hex::encode(keys.key_hash()));
    if let Some(admin) = admin_key_hash {
        let script = NativeScript::any_of_keys(keys.key_hash(), parse_key_hash(&admin)?);
        println!("lobby:     {}", script.address(network).to_bech32()?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Keygen { out, network } => keygen(out, network).map(|_| ExitCode::SUCCESS),
        Command::Address {
            key_file,
            admin_key_hash,
            network,
        } => address(key_file, admin_key_hash, network).map(|_| ExitCode::SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "head-node",
            "run",
            "--mode",
            "dedicated",
            "--peer-index",
            "4",
            "--network",
            "mainnet",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.mode, Some(Mode::Dedicated));
                assert_eq!(args.peer_index, Some(4));
                assert_eq!(args.network, Some(Network::Mainnet));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["head-node", "run", "--mode", "referee"]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(
            &path,
            r#"{"mode": "server", "node_url": "ws://head:4001", "peer_index": 2, "synthetic_rate": 5}"#,
        )
        .unwrap();

        let config = RunArgs {
            config: Some(path),
            peer_index: Some(7),
            mode: Some(Mode::Dedicated),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.mode, Mode::Dedicated);
        assert_eq!(config.peer_index, 7);
        assert_eq!(config.node_url, "ws://head:4001");
        assert_eq!(config.synthetic_rate, Some(5));
    }

    #[test]
    fn test_keygen_writes_loadable_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.skey");
        keygen(path.clone(), Network::Testnet).unwrap();
        let keys = ClientKeySet::load(&path, Network::Testnet).unwrap();
        assert_eq!(keys.network(), Network::Testnet);
    }
}
