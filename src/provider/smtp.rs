//! Delivery through an SMTP smarthost.

use base64::prelude::*;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use super::{DeliveryFuture, DeliveryProvider};
use crate::error::{DeliveryError, Error, Result};
use crate::mapper::{EmailAddress, SendRequest};

/// Configuration for the SMTP smarthost.
#[derive(Debug, Clone)]
pub struct SmtpForwardConfig {
    /// SMTP host to forward to
    pub host: String,
    /// SMTP port (default: 25 or 587)
    pub port: u16,
    /// Use TLS (STARTTLS or implicit)
    pub tls: bool,
    /// Use implicit TLS (SMTPS)
    pub implicit_tls: bool,
    /// Username for SMTP AUTH
    pub username: Option<String>,
    /// Password for SMTP AUTH
    pub password: Option<String>,
}

/// Provider that re-submits each request to another SMTP server.
pub struct SmtpForwardProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpForwardProvider {
    /// Build the provider and its connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unusable host and [`Error::Tls`] if
    /// TLS parameters cannot be built.
    pub fn new(config: &SmtpForwardConfig) -> Result<Self> {
        if config.host.is_empty() {
            return Err(Error::Config("forward host is empty".into()));
        }

        let mut builder = if config.implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| Error::Config(e.to_string()))?
        } else if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| Error::Config(e.to_string()))?
        } else {
            let tls_params = TlsParameters::builder(config.host.clone())
                .dangerous_accept_invalid_certs(true)
                .build()
                .map_err(|e| Error::Tls(e.to_string()))?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .tls(Tls::Opportunistic(tls_params))
        };

        builder = builder.port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        info!(
            host = %config.host,
            port = config.port,
            "SMTP forward provider initialized"
        );

        Ok(Self {
            transport: builder.build(),
        })
    }
}

impl DeliveryProvider for SmtpForwardProvider {
    fn send<'a>(&'a self, request: &'a SendRequest) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let message = build_message(request)?;
            let response = self.transport.send(message).await?;
            let code = response.code().to_string();
            debug!(code = %code, "Smarthost accepted message");
            code.parse::<u16>()
                .map_err(|e| DeliveryError::Transport(format!("unexpected reply code {code}: {e}")))
        })
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

fn mailbox(addr: &EmailAddress) -> std::result::Result<Mailbox, DeliveryError> {
    let email: Address = addr
        .email
        .parse()
        .map_err(|_| DeliveryError::InvalidRequest(format!("invalid address: {}", addr.email)))?;
    Ok(Mailbox::new(addr.name.clone(), email))
}

/// Render a [`SendRequest`] as a MIME message: `multipart/alternative` for
/// the bodies, wrapped in `multipart/mixed` when attachments are present.
pub(crate) fn build_message(request: &SendRequest) -> std::result::Result<Message, DeliveryError> {
    let mut builder = Message::builder().from(mailbox(&request.from)?);
    for to in &request.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &request.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    if let Some(subject) = &request.subject {
        builder = builder.subject(subject);
    }

    let alternative = MultiPart::alternative_plain_html(
        request.plain_text_content.clone(),
        request.html_content.clone(),
    );

    if request.attachments.is_empty() {
        return Ok(builder.multipart(alternative)?);
    }

    let mut mixed = MultiPart::mixed().multipart(alternative);
    for att in &request.attachments {
        let content = BASE64_STANDARD.decode(&att.content).map_err(|e| {
            DeliveryError::InvalidRequest(format!("attachment '{}': {e}", att.filename))
        })?;
        let content_type = ContentType::parse(&att.mime_type)
            .or_else(|_| ContentType::parse("application/octet-stream"))
            .map_err(|e| DeliveryError::InvalidRequest(e.to_string()))?;
        mixed = mixed.singlepart(Attachment::new(att.filename.clone()).body(content, content_type));
    }

    Ok(builder.multipart(mixed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::EncodedAttachment;

    fn request() -> SendRequest {
        SendRequest {
            from: EmailAddress {
                email: "a@x.com".into(),
                name: Some("Alice".into()),
            },
            to: vec![EmailAddress {
                email: "b@y.com".into(),
                name: None,
            }],
            cc: vec![EmailAddress {
                email: "c@z.com".into(),
                name: None,
            }],
            subject: Some("Report".into()),
            html_content: "<b>see attached</b>".into(),
            plain_text_content: "see attached".into(),
            attachments: vec![EncodedAttachment {
                content: BASE64_STANDARD.encode(b"a,b\n1,2\n"),
                filename: "report.csv".into(),
                mime_type: "text/csv".into(),
            }],
        }
    }

    #[test]
    fn test_build_message_with_attachment() {
        let message = build_message(&request()).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: Report"));
        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("report.csv"));

        let envelope = message.envelope();
        assert_eq!(envelope.to().len(), 2);
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let mut req = request();
        req.to[0].email = "not an address".into();
        assert!(matches!(
            build_message(&req),
            Err(DeliveryError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_empty_host_is_config_error() {
        let config = SmtpForwardConfig {
            host: String::new(),
            port: 25,
            tls: false,
            implicit_tls: false,
            username: None,
            password: None,
        };
        assert!(matches!(
            SmtpForwardProvider::new(&config),
            Err(Error::Config(_))
        ));
    }
}
