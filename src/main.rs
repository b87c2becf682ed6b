//! CLI entry point for smtp-relay.

use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use smtp_relay::provider::{
    SendGridProvider, SmtpForwardConfig, SmtpForwardProvider, SENDGRID_ENDPOINT,
};
use smtp_relay::{start_relay, DeliveryProvider, Error, RelayOptions};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    /// SendGrid v3 HTTP API
    Sendgrid,
    /// Another SMTP server
    Smtp,
}

#[derive(Parser, Debug)]
#[command(name = "smtp-relay")]
#[command(about = "Receive emails via SMTP and relay them to a transactional email API")]
struct Cli {
    /// SMTP port to listen on
    #[arg(short = 'p', long, env = "RELAY_PORT", default_value = "25")]
    port: u16,

    /// Server name used in the greeting and EHLO reply
    #[arg(long, env = "RELAY_SERVER_NAME", default_value = "localhost")]
    server_name: String,

    /// Comma-separated list of allowed sender addresses
    #[arg(short = 'w', long, env = "RELAY_WHITELIST")]
    whitelist: Option<String>,

    /// Delivery provider
    #[arg(long, env = "RELAY_PROVIDER", value_enum, default_value = "sendgrid")]
    provider: Provider,

    /// SendGrid API key
    #[arg(long, env = "SG_API_KEY", hide_env_values = true)]
    sendgrid_api_key: Option<String>,

    /// SendGrid mail send endpoint
    #[arg(long, env = "SG_ENDPOINT", default_value = SENDGRID_ENDPOINT)]
    sendgrid_endpoint: String,

    /// SMTP host to forward to (smtp provider)
    #[arg(long, env = "FORWARD_HOST")]
    forward_host: Option<String>,

    /// SMTP port to forward to
    #[arg(long, env = "FORWARD_PORT", default_value = "587")]
    forward_port: u16,

    /// Use STARTTLS when forwarding
    #[arg(long, env = "FORWARD_TLS")]
    forward_tls: bool,

    /// Use implicit TLS when forwarding
    #[arg(long, env = "FORWARD_IMPLICIT_TLS")]
    forward_implicit_tls: bool,

    /// Username for the forward host
    #[arg(long, env = "FORWARD_USERNAME")]
    forward_username: Option<String>,

    /// Password for the forward host
    #[arg(long, env = "FORWARD_PASSWORD", hide_env_values = true)]
    forward_password: Option<String>,

    /// Offer STARTTLS on the SMTP port
    #[arg(long)]
    tls: bool,

    /// Path to PEM private key
    #[arg(long)]
    tls_key: Option<String>,

    /// Path to PEM certificate
    #[arg(long)]
    tls_cert: Option<String>,

    /// Also listen for implicit TLS (SMTPS) on this port
    #[arg(long)]
    smtps_port: Option<u16>,
}

impl Cli {
    fn build_provider(&self) -> Result<Arc<dyn DeliveryProvider>, Error> {
        match self.provider {
            Provider::Sendgrid => {
                let api_key = self
                    .sendgrid_api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| Error::Config("SG_API_KEY is not set".into()))?;
                let provider = SendGridProvider::new(SecretString::from(api_key))
                    .with_endpoint(self.sendgrid_endpoint.clone());
                Ok(Arc::new(provider))
            }
            Provider::Smtp => {
                let host = self
                    .forward_host
                    .clone()
                    .ok_or_else(|| Error::Config("FORWARD_HOST is not set".into()))?;
                let config = SmtpForwardConfig {
                    host,
                    port: self.forward_port,
                    tls: self.forward_tls,
                    implicit_tls: self.forward_implicit_tls,
                    username: self.forward_username.clone(),
                    password: self.forward_password.clone(),
                };
                Ok(Arc::new(SmtpForwardProvider::new(&config)?))
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let provider = cli.build_provider()?;

    let whitelist: Vec<String> = cli
        .whitelist
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let opts = RelayOptions {
        smtp_port: Some(cli.port),
        server_name: Some(cli.server_name),
        whitelist,
        tls: cli.tls,
        tls_key_path: cli.tls_key,
        tls_cert_path: cli.tls_cert,
        smtps_port: cli.smtps_port,
    };

    let relay = start_relay(opts, provider).await?;
    info!("SMTP relay started; press CTRL-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("CTRL-C received, shutting down");
    relay.stop().await;
    info!("SMTP relay stopped");

    Ok(())
}
