//! SMTP relay library: receive emails via SMTP and forward them to a
//! transactional email API.

mod decode;
mod email;
mod error;
mod mapper;
mod policy;
pub mod provider;
mod relay;
mod smtp;
mod tls;

pub use decode::{payload_size_kb, MessageDecoder};
pub use email::{Attachment, Mailbox, StructuredEmail};
pub use error::{DeliveryError, Error, RelayError, Result};
pub use mapper::{
    DeliveryMapper, EmailAddress, EncodedAttachment, MappedRequest, SendRequest, FALLBACK_CONTENT,
};
pub use policy::{AcceptAll, AcceptancePolicy, SenderAllowList};
pub use provider::{DeliveryFuture, DeliveryProvider};
pub use relay::{RelayPipeline, RelayState, SendOutcome};

use smtp::SmtpConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// Configuration options for the relay.
#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    pub smtp_port: Option<u16>,
    pub server_name: Option<String>,
    pub whitelist: Vec<String>,
    pub tls: bool,
    pub tls_key_path: Option<String>,
    pub tls_cert_path: Option<String>,
    pub smtps_port: Option<u16>,
}

/// Running server handles.
pub struct RunningRelay {
    pub smtp_addr: SocketAddr,
    pub smtps_addr: Option<SocketAddr>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RunningRelay {
    /// Stop accepting connections and wait for the listeners to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Start the relay with the given options, delivering through `provider`.
///
/// A non-empty `whitelist` selects [`SenderAllowList`]; otherwise every
/// transaction is accepted.
///
/// # Errors
///
/// Fails if a listener cannot be bound or the TLS setup is invalid.
pub async fn start_relay(
    opts: RelayOptions,
    provider: Arc<dyn DeliveryProvider>,
) -> Result<RunningRelay> {
    let allow_list = SenderAllowList::new(&opts.whitelist);
    let policy: Arc<dyn AcceptancePolicy> = if allow_list.is_empty() {
        Arc::new(AcceptAll)
    } else {
        Arc::new(allow_list)
    };
    start_relay_with_policy(opts, provider, policy).await
}

/// Start the relay with an explicit acceptance policy.
///
/// # Errors
///
/// Fails if a listener cannot be bound or the TLS setup is invalid.
pub async fn start_relay_with_policy(
    opts: RelayOptions,
    provider: Arc<dyn DeliveryProvider>,
    policy: Arc<dyn AcceptancePolicy>,
) -> Result<RunningRelay> {
    let smtp_port = opts.smtp_port.unwrap_or(25);
    let server_name = opts.server_name.unwrap_or_else(|| "localhost".to_string());

    let tls_acceptor = if opts.tls || opts.smtps_port.is_some() {
        Some(
            tls::create_acceptor(
                opts.tls_key_path.as_deref(),
                opts.tls_cert_path.as_deref(),
                &server_name,
            )
            .await?,
        )
    } else {
        None
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let config = SmtpConfig {
        server_name,
        tls_acceptor: if opts.tls { tls_acceptor.clone() } else { None },
        policy,
        pipeline: RelayPipeline::new(provider),
    };

    let smtp_listener = TcpListener::bind(("0.0.0.0", smtp_port)).await?;
    let smtp_addr = smtp_listener.local_addr()?;
    info!(
        port = smtp_addr.port(),
        server_name = %config.server_name,
        provider = config.pipeline.provider().name(),
        policy = config.policy.name(),
        "SMTP server listening"
    );

    let mut handles = Vec::new();

    let smtp_config = config.clone();
    let smtp_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        smtp::run_smtp_server(smtp_listener, smtp_config, smtp_shutdown).await;
    }));

    let smtps_addr = match (opts.smtps_port, tls_acceptor) {
        (Some(port), Some(acceptor)) => {
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            let addr = listener.local_addr()?;
            info!(port = addr.port(), "SMTPS server listening");

            let smtps_shutdown = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                smtp::run_smtps_server(listener, config, acceptor, smtps_shutdown).await;
            }));
            Some(addr)
        }
        _ => None,
    };

    Ok(RunningRelay {
        smtp_addr,
        smtps_addr,
        handles,
        shutdown_tx,
    })
}
