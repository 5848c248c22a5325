//! Keyrelay command-line tool.
//!
//! Out-of-band operations around a node's ratchet and controller key.
//!
//! # Usage
//!
//! ```bash
//! # Seed a new ratchet file with 32 random bytes
//! keyrelay ratchet-init --file node.ratchet
//!
//! # Advance it one generation
//! keyrelay ratchet-advance --file node.ratchet
//!
//! # Key id a node would use for a topic (never prints the key)
//! keyrelay key-id --file node.ratchet --topic orders --node node-7
//!
//! # Create a controller key and print the line for a provisioners file
//! keyrelay cryptokey-init --file controller.key
//! ```

#![allow(clippy::print_stdout, reason = "CLI output")]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keyrelay_controller::{Environment, SystemEnv};
use keyrelay_crypto::{CryptoKey, Ed25519CryptoKey, FileStore, Ratchet, SECRET_SIZE};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

/// Keyrelay ratchet and controller key tool
#[derive(Parser, Debug)]
#[command(name = "keyrelay")]
#[command(about = "Keyrelay ratchet and controller key management")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a ratchet file seeded with a random secret
    RatchetInit {
        /// Ratchet file to create (must not exist)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Advance a ratchet file by one generation
    RatchetAdvance {
        /// Seeded ratchet file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the key id for a topic at the next generation
    KeyId {
        /// Seeded ratchet file
        #[arg(short, long)]
        file: PathBuf,

        /// Topic to derive for
        #[arg(short, long)]
        topic: String,

        /// Node identifier to bind into the key id
        #[arg(short, long)]
        node: Option<String>,
    },

    /// Create a controller key file and print its verifying key
    CryptokeyInit {
        /// Key file to create (must not exist)
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let env = SystemEnv::new();

    match args.command {
        Command::RatchetInit { file } => {
            let seed = Zeroizing::new(env.random_array::<SECRET_SIZE>());
            let mut store = FileStore::create_new(&file)?;
            Ratchet::seed(&mut store, &*seed)?;
            println!("{}", file.display());
        },
        Command::RatchetAdvance { file } => {
            let ratchet = Ratchet::open_path(&file)?;
            println!("{}", ratchet.index());
        },
        Command::KeyId { file, topic, node } => {
            let ratchet = Ratchet::open_path(&file)?;
            let keys = ratchet.get_key_value_generators(
                topic.as_bytes(),
                node.as_deref().map(str::as_bytes),
            )?;
            println!("{}", hex::encode(&keys.key_id));
        },
        Command::CryptokeyInit { file } => {
            let seed = Zeroizing::new(env.random_array::<SECRET_SIZE>());
            let key = Ed25519CryptoKey::create_seed_file(&file, &*seed)?;
            println!("{}", hex::encode(key.verifying_key()));
        },
    }

    Ok(())
}
