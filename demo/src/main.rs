//! jwtgate operator CLI
//!
//! - `authorize` - run a raw `Authorization` header value through the resource-server path
//! - `token` - obtain an access token on behalf of a subject via the jwt-bearer grant
//! - `seal` - package an encrypted PKCS#8 key and its certificate into a key container
//!
//! Configuration comes from the environment (`IDCS_URL`, `CLIENT_ID`, ...) or `--config`.
//! Secret identifiers resolve to files under `--secrets-dir`. Logs go to stderr so stdout
//! carries only command output.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jwtgate_auth::{
    FileSecretProvider, KeyContainerBuilder, KeyMaterialStore, SecretProvider, SecurityConfig,
    SecurityOrchestrator,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "jwtgate",
    version,
    about = "OAuth2 jwt-bearer assertions and JWKS bearer validation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging (-v, -vv for trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Configuration file (TOML, YAML or JSON) instead of the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one file per secret identifier
    #[arg(long, global = true, env = "JWTGATE_SECRETS_DIR", default_value = "/run/secrets")]
    secrets_dir: PathBuf,

    /// Secret files are base64-encoded
    #[arg(long, global = true)]
    base64_secrets: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate an Authorization header value and print the decision
    Authorize {
        /// Full header value, e.g. "Bearer eyJ..."
        #[arg(long)]
        header: String,
    },
    /// Obtain an access token for a subject
    Token {
        #[arg(long)]
        subject: String,
    },
    /// Build a key container from an encrypted PKCS#8 key and its certificate
    Seal {
        /// Encrypted PKCS#8 private key (PEM)
        #[arg(long)]
        key: PathBuf,
        /// Certificate chain, leaf first (PEM)
        #[arg(long)]
        cert: PathBuf,
        /// Alias the key is stored under (the KEY_ID used for signing)
        #[arg(long)]
        alias: String,
        /// Output file
        #[arg(long)]
        out: PathBuf,
        /// Environment variable holding the container passphrase
        #[arg(long, default_value = "JWTGATE_CONTAINER_PASS")]
        container_pass_env: String,
        /// Environment variable holding the private key passphrase
        #[arg(long, default_value = "JWTGATE_KEY_PASS")]
        key_pass_env: String,
    },
}

impl Cli {
    fn init_tracing(&self) -> io::Result<()> {
        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = tracing_subscriber::registry().with(filter);

        if self.json_logs {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        } else {
            subscriber
                .with(fmt::layer().with_target(false).with_writer(io::stderr))
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
    }

    fn security_config(&self) -> Result<SecurityConfig> {
        let config = match &self.config {
            Some(path) => SecurityConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SecurityConfig::from_env().context("loading configuration from environment")?,
        };
        Ok(config)
    }

    fn secrets(&self) -> Arc<dyn SecretProvider> {
        if self.base64_secrets {
            Arc::new(FileSecretProvider::base64(&self.secrets_dir))
        } else {
            Arc::new(FileSecretProvider::new(&self.secrets_dir))
        }
    }

    async fn execute(&self) -> Result<ExitCode> {
        match &self.command {
            Command::Authorize { header } => {
                let orchestrator = SecurityOrchestrator::new(self.security_config()?, self.secrets())?;
                let decision = orchestrator.authorize_incoming(header).await;
                println!("{}", serde_json::to_string_pretty(&decision)?);
                Ok(if decision.active {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                })
            }
            Command::Token { subject } => {
                let orchestrator = SecurityOrchestrator::new(self.security_config()?, self.secrets())?;
                let token = orchestrator
                    .get_asserted_access_token(subject)
                    .await
                    .with_context(|| format!("obtaining access token for '{subject}'"))?;
                println!("{token}");
                Ok(ExitCode::SUCCESS)
            }
            Command::Seal {
                key,
                cert,
                alias,
                out,
                container_pass_env,
                key_pass_env,
            } => {
                seal(key, cert, alias, out, container_pass_env, key_pass_env).await?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

async fn seal(
    key: &Path,
    cert: &Path,
    alias: &str,
    out: &Path,
    container_pass_env: &str,
    key_pass_env: &str,
) -> Result<()> {
    let container_pass = std::env::var(container_pass_env)
        .with_context(|| format!("{container_pass_env} is not set"))?;
    let key_pass =
        std::env::var(key_pass_env).with_context(|| format!("{key_pass_env} is not set"))?;

    let key_pem = tokio::fs::read_to_string(key)
        .await
        .with_context(|| format!("reading {}", key.display()))?;
    let cert_pem = tokio::fs::read_to_string(cert)
        .await
        .with_context(|| format!("reading {}", cert.display()))?;

    let container = KeyContainerBuilder::new()
        .add_entry(alias, &key_pem, &cert_pem)?
        .seal(container_pass.as_bytes())?;

    // Refuse to write a container that cannot be opened with the given passphrases.
    let store = KeyMaterialStore::new();
    store
        .load_from_bytes(container.as_bytes(), container_pass.as_bytes(), key_pass.as_bytes())
        .await
        .context("sealed container does not open with the given passphrases")?;
    let material = store.key_material(alias).await?;

    tokio::fs::write(out, container)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    info!(
        alias,
        out = %out.display(),
        x5t = %material.thumbprint_sha1(),
        "Sealed key container"
    );
    println!("{}", out.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    cli.init_tracing()?;
    cli.execute().await
}
