//! The relay pipeline: decode, map, deliver.

use std::sync::Arc;

use tracing::{error, info};

use crate::decode::{payload_size_kb, MessageDecoder};
use crate::error::RelayError;
use crate::mapper::DeliveryMapper;
use crate::provider::DeliveryProvider;

/// Terminal state of one relay invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// The provider accepted the message
    Delivered,
    /// The payload was not a parseable message
    DecodeFailed,
    /// The message could not be mapped to a send request
    MapFailed,
    /// The provider call failed
    DeliveryFailed,
}

/// Result of a single relay attempt. Logged and dropped; never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub state: RelayState,
    pub status: Option<u16>,
    pub attachment_count: usize,
    pub error: Option<RelayError>,
}

impl SendOutcome {
    fn failed(state: RelayState, attachment_count: usize, error: RelayError) -> Self {
        Self {
            state,
            status: None,
            attachment_count,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.state == RelayState::Delivered
    }
}

/// Forwards accepted SMTP payloads to a [`DeliveryProvider`].
///
/// Every failure stays inside [`relay`](Self::relay): the caller always gets a
/// [`SendOutcome`] and the SMTP transaction is acknowledged regardless.
#[derive(Clone)]
pub struct RelayPipeline {
    decoder: MessageDecoder,
    mapper: DeliveryMapper,
    provider: Arc<dyn DeliveryProvider>,
}

impl RelayPipeline {
    #[must_use]
    pub fn new(provider: Arc<dyn DeliveryProvider>) -> Self {
        Self {
            decoder: MessageDecoder::new(),
            mapper: DeliveryMapper::new(),
            provider,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn DeliveryProvider> {
        &self.provider
    }

    /// Relay one raw message.
    pub async fn relay(&self, raw: &[u8]) -> SendOutcome {
        let email = match self.decoder.decode(raw) {
            Ok(email) => email,
            Err(e) => {
                error!(size = raw.len(), error = %e, "Failed to decode message");
                return SendOutcome::failed(RelayState::DecodeFailed, 0, e);
            }
        };

        let size_kb = payload_size_kb(raw.len());
        info!(
            subject = email.subject_summary(),
            from = %email.sender_summary(),
            to = %email.recipient_summary(),
            "Relaying email '{}' from {} to {} ({size_kb:.2} KB)",
            email.subject_summary(),
            email.sender_summary(),
            email.recipient_summary(),
        );

        let mapped = match self.mapper.map_to_send_request(&email) {
            Ok(mapped) => mapped,
            Err(e) => {
                error!(subject = email.subject_summary(), error = %e, "Failed to map email");
                return SendOutcome::failed(RelayState::MapFailed, 0, e);
            }
        };

        match self.provider.send(&mapped.request).await {
            Ok(status) => {
                info!(
                    provider = self.provider.name(),
                    status,
                    attachments = mapped.attachment_count,
                    "Email sent with status code {status}. Attachments: {}",
                    mapped.attachment_count
                );
                SendOutcome {
                    state: RelayState::Delivered,
                    status: Some(status),
                    attachment_count: mapped.attachment_count,
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    provider = self.provider.name(),
                    subject = email.subject_summary(),
                    error = %e,
                    "Error forwarding email '{}'",
                    email.subject_summary()
                );
                SendOutcome::failed(
                    RelayState::DeliveryFailed,
                    mapped.attachment_count,
                    RelayError::Delivery(e),
                )
            }
        }
    }
}
