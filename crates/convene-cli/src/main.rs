//! Convene command-line driver.
//!
//! # Usage
//!
//! ```bash
//! # Public pattern hash and user hash for a shared secret
//! convene derive --secret "shake:3,1,4,1" --digest 2024-06-01T12:05 --user-id u1
//!
//! # Commitment chain over a meeting secret, revealing a link
//! convene chain --secret-hex 00112233... --chain-rounds 100 --reveal 10
//!
//! # Deterministic in-memory run: discovery, meeting, signature, storage
//! convene simulate --devices 3 --seed 7 --failure-rate 0.2
//! ```

mod simulate;

use std::time::Duration;

use clap::{Parser, Subcommand};
use convene_core::{KdfParams, ProtocolConfig, WorkerPool};
use convene_crypto::{generate_chain, verify_reveal};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::simulate::SimulationConfig;

/// Convene protocol driver
#[derive(Parser, Debug)]
#[command(name = "convene")]
#[command(about = "Co-presence discovery and meeting ledger toolkit")]
#[command(version)]
struct Args {
    /// Operation to run
    #[command(subcommand)]
    command: Command,

    /// Argon2id memory cost in KiB
    #[arg(long, global = true, default_value_t = KdfParams::interactive().memory_kib)]
    kdf_memory_kib: u32,

    /// Argon2id passes
    #[arg(long, global = true, default_value_t = KdfParams::interactive().iterations)]
    kdf_iterations: u32,

    /// Argon2id lanes
    #[arg(long, global = true, default_value_t = KdfParams::interactive().parallelism)]
    kdf_parallelism: u32,

    /// Hash chain and pseudonym rounds
    #[arg(long, global = true, default_value_t = convene_crypto::DEFAULT_CHAIN_ROUNDS)]
    chain_rounds: usize,

    /// Maximum concurrent derivation workers
    #[arg(long, global = true, default_value_t = convene_core::config::DEFAULT_MAX_WORKERS)]
    workers: usize,

    /// Handshake lifetime in seconds
    #[arg(long, global = true, default_value_t = convene_core::config::DEFAULT_HANDSHAKE_TTL.as_secs())]
    handshake_ttl: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Command {
    /// Derive the public pattern hash (and optionally a user hash)
    Derive {
        /// Shared secret as observed by the device
        #[arg(long)]
        secret: String,

        /// Public digest both devices agree on
        #[arg(long)]
        digest: String,

        /// Also derive the public user hash for this id
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Build a commitment chain over a meeting secret
    Chain {
        /// Meeting secret, hex encoded
        #[arg(long)]
        secret_hex: String,

        /// Reveal the link this many steps before the terminal
        #[arg(long)]
        reveal: Option<usize>,
    },

    /// Run devices against an in-memory broker end to end
    Simulate {
        /// Number of co-present devices
        #[arg(long, default_value_t = 3)]
        devices: usize,

        /// Seed for a reproducible run; system randomness if absent
        #[arg(long)]
        seed: Option<u64>,

        /// Probability that a discovery broker operation fails
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,

        /// Public digest shared by all devices
        #[arg(long, default_value = "digest-0")]
        digest: String,
    },
}

/// Invalid command-line input.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// A hex flag did not decode
    #[error("invalid hex in --{flag}: {reason}")]
    InvalidHex {
        /// Flag name without dashes
        flag: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Requested link lies before the start of the chain
    #[error("--reveal {steps} exceeds a chain of {rounds} rounds")]
    RevealOutOfRange {
        /// Requested distance from the terminal
        steps: usize,
        /// Chain length
        rounds: usize,
    },

    /// Failure probability outside `[0, 1]`
    #[error("--failure-rate must be within [0, 1], got {0}")]
    FailureRate(f64),

    /// A simulation needs at least two devices to discover anything
    #[error("--devices must be at least 2, got {0}")]
    TooFewDevices(usize),
}

impl Args {
    /// Protocol parameters from the global flags.
    fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            kdf: KdfParams {
                memory_kib: self.kdf_memory_kib,
                iterations: self.kdf_iterations,
                parallelism: self.kdf_parallelism,
            },
            chain_rounds: self.chain_rounds,
            max_workers: self.workers,
            handshake_ttl: Duration::from_secs(self.handshake_ttl),
            ..ProtocolConfig::default()
        }
    }
}

/// Public pattern hash and optional user hash, derived on the worker pool.
async fn derive_hashes(
    config: &ProtocolConfig,
    secret: String,
    digest: String,
    user_id: Option<String>,
) -> Result<(String, Option<String>), Box<dyn std::error::Error>> {
    let pool = WorkerPool::new(config.max_workers);
    let kdf = config.kdf;

    let pattern_digest = digest.clone();
    let material = pool
        .run(move || convene_crypto::derive(secret.as_bytes(), &pattern_digest, &kdf))
        .await??;

    let user_hash = match user_id {
        Some(user_id) => Some(
            pool.run(move || convene_crypto::derive_user_hash(&user_id, &digest, &kdf)).await??,
        ),
        None => None,
    };

    Ok((material.public_pattern_hash().to_string(), user_hash))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.protocol_config();
    tracing::debug!(?config, "protocol configuration");

    match args.command {
        Command::Derive { secret, digest, user_id } => {
            let (pattern_hash, user_hash) = derive_hashes(&config, secret, digest, user_id).await?;
            tracing::info!(public_pattern_hash = %pattern_hash, "pattern derived");

            if let Some(user_hash) = user_hash {
                tracing::info!(public_user_hash = %user_hash, "user hash derived");
            }
        },
        Command::Chain { secret_hex, reveal } => {
            let secret = hex::decode(&secret_hex)
                .map_err(|e| CliError::InvalidHex { flag: "secret-hex", reason: e.to_string() })?;
            let chain = generate_chain(&secret, config.chain_rounds)?;
            tracing::info!(terminal = %chain.terminal_hex(), rounds = chain.len(), "chain generated");

            if let Some(steps) = reveal {
                let link = chain
                    .reveal(steps)
                    .ok_or(CliError::RevealOutOfRange { steps, rounds: chain.len() })?;
                let verified = verify_reveal(link, chain.terminal(), steps);
                tracing::info!(steps, link = %hex::encode(link), verified, "link revealed");
            }
        },
        Command::Simulate { devices, seed, failure_rate, digest } => {
            if !(0.0..=1.0).contains(&failure_rate) {
                return Err(CliError::FailureRate(failure_rate).into());
            }
            if devices < 2 {
                return Err(CliError::TooFewDevices(devices).into());
            }

            let sim = SimulationConfig { devices, failure_rate, digest, protocol: config };
            let report = match seed {
                Some(seed) => simulate::run_seeded(sim, seed).await?,
                None => simulate::run_system(sim).await?,
            };

            tracing::info!(
                meeting_id = %report.meeting_id,
                participants = report.participant_count,
                block = %report.block_hash,
                broker_failures = report.retries,
                "simulation complete"
            );
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn derive_matches_direct_derivation() {
        let config = ProtocolConfig::testing();

        let (pattern_hash, user_hash) = derive_hashes(
            &config,
            "S1".to_string(),
            "D1".to_string(),
            Some("u1".to_string()),
        )
        .await
        .unwrap();

        let direct = convene_crypto::derive(b"S1", "D1", &config.kdf).unwrap();
        assert_eq!(pattern_hash, direct.public_pattern_hash());
        assert_eq!(
            user_hash,
            Some(convene_crypto::derive_user_hash("u1", "D1", &config.kdf).unwrap())
        );
    }

    #[tokio::test]
    async fn derive_without_user_id_skips_user_hash() {
        let (_, user_hash) =
            derive_hashes(&ProtocolConfig::testing(), "S1".to_string(), "D1".to_string(), None)
                .await
                .unwrap();

        assert_eq!(user_hash, None);
    }
}
