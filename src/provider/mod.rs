//! Outbound delivery providers.
//!
//! A [`DeliveryProvider`] takes a mapped [`SendRequest`] and hands it to an
//! external service. [`SendGridProvider`] posts to the SendGrid v3 API;
//! [`SmtpForwardProvider`] relays through an SMTP smarthost.

mod sendgrid;
mod smtp;

pub use sendgrid::{SendGridProvider, SENDGRID_ENDPOINT};
pub use smtp::{SmtpForwardConfig, SmtpForwardProvider};

use std::future::Future;
use std::pin::Pin;

use crate::error::DeliveryError;
use crate::mapper::SendRequest;

/// Boxed future returned by [`DeliveryProvider::send`], resolving to the
/// provider's status code.
pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<u16, DeliveryError>> + Send + 'a>>;

/// An external service that performs the actual outbound send.
///
/// Providers are shared read-only across all concurrent relays. They handle
/// their own transport and authentication; the pipeline never retries.
pub trait DeliveryProvider: Send + Sync {
    /// Send one request, returning the provider status code on success.
    fn send<'a>(&'a self, request: &'a SendRequest) -> DeliveryFuture<'a>;

    /// Returns the name of this provider.
    fn name(&self) -> &str;
}
