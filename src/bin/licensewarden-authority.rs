//! Licensewarden issuing authority.
//!
//! Signs licenses and answers online validation requests.
//!
//! Usage:
//!   licensewarden-authority --generate-key
//!   LICENSEWARDEN_SIGNING_KEY=<seed hex> LICENSEWARDEN_OPERATOR_TOKEN=<token> \
//!     licensewarden-authority --bind 0.0.0.0:8787 --records records.json

use clap::Parser;
use licensewarden::authority::config::DEFAULT_BIND;
use licensewarden::authority::{create_router, AppState, AuthorityConfig, LicenseAuthority, RecordStore};
use licensewarden::crypto::signing::{decode_signing_key, generate_signing_key, key_fingerprint, public_key_hex};
use licensewarden::LicenseError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "licensewarden-authority")]
#[command(about = "Licensewarden license issuing authority")]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "LICENSEWARDEN_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Ed25519 signing seed (64 hex chars)
    #[arg(long, env = "LICENSEWARDEN_SIGNING_KEY", hide_env_values = true)]
    signing_key: Option<String>,

    /// Bearer token for operator endpoints
    #[arg(long, env = "LICENSEWARDEN_OPERATOR_TOKEN", hide_env_values = true)]
    operator_token: Option<String>,

    /// JSON snapshot file for license records
    #[arg(short, long, env = "LICENSEWARDEN_RECORDS")]
    records: Option<PathBuf>,

    /// Print a fresh signing seed and its public key, then exit
    #[arg(long)]
    generate_key: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), LicenseError> {
    let args = Args::parse();

    if args.generate_key {
        let signing_key = generate_signing_key();
        println!("signing_key={}", hex::encode(signing_key.to_bytes()));
        println!("public_key={}", public_key_hex(&signing_key));
        println!("fingerprint={}", key_fingerprint(&signing_key.verifying_key()));
        return Ok(());
    }

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = AuthorityConfig {
        bind: args.bind,
        signing_key_hex: args.signing_key.ok_or_else(|| {
            LicenseError::ConfigError("--signing-key or LICENSEWARDEN_SIGNING_KEY is required".to_string())
        })?,
        operator_token: args.operator_token.ok_or_else(|| {
            LicenseError::ConfigError(
                "--operator-token or LICENSEWARDEN_OPERATOR_TOKEN is required".to_string(),
            )
        })?,
        records_path: args.records,
    };
    config.validate()?;

    let records = match &config.records_path {
        Some(path) => RecordStore::open(path.clone())?,
        None => RecordStore::in_memory(),
    };
    let authority = Arc::new(LicenseAuthority::new(
        decode_signing_key(&config.signing_key_hex)?,
        records,
    ));
    info!(
        fingerprint = %authority.key_fingerprint(),
        public_key = %authority.public_key_hex(),
        "Authority key loaded"
    );

    let app = create_router(AppState::new(authority, &config.operator_token));
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| LicenseError::ConfigError(format!("Failed to bind {}: {}", config.bind, e)))?;
    info!(bind = %config.bind, "Licensewarden authority listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .map_err(|e| LicenseError::AuthorityTransport(format!("Server error: {}", e)))
}
