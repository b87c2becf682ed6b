//! [`StructuredEmail`] to provider [`SendRequest`] mapping.

use base64::prelude::*;

use crate::email::{Mailbox, StructuredEmail};
use crate::error::RelayError;

/// Substituted for any content field that would otherwise be empty.
pub const FALLBACK_CONTENT: &str = "No Content Provided";

/// Address entry of a [`SendRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub email: String,
    pub name: Option<String>,
}

impl From<&Mailbox> for EmailAddress {
    fn from(mb: &Mailbox) -> Self {
        Self {
            email: mb.address.clone(),
            name: mb.name.clone().filter(|n| !n.is_empty()),
        }
    }
}

/// Attachment entry of a [`SendRequest`], content already base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAttachment {
    pub content: String,
    pub filename: String,
    pub mime_type: String,
}

/// Provider-independent outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub subject: Option<String>,
    pub html_content: String,
    pub plain_text_content: String,
    pub attachments: Vec<EncodedAttachment>,
}

/// A mapped request together with the number of attachments it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRequest {
    pub request: SendRequest,
    pub attachment_count: usize,
}

/// Maps decoded messages onto [`SendRequest`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryMapper;

impl DeliveryMapper {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Build the send request for `email`.
    ///
    /// HTML content falls back to the text body, then to
    /// [`FALLBACK_CONTENT`]; plain-text content falls back to
    /// [`FALLBACK_CONTENT`] directly.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoSenderAddress`] if the message has no sender or
    /// the sender address is blank.
    pub fn map_to_send_request(&self, email: &StructuredEmail) -> Result<MappedRequest, RelayError> {
        let sender = email
            .sender
            .as_ref()
            .filter(|mb| mb.has_address())
            .ok_or(RelayError::NoSenderAddress)?;

        let html = non_empty(email.html_body.as_deref());
        let text = non_empty(email.text_body.as_deref());

        let attachments: Vec<EncodedAttachment> = email
            .attachments
            .iter()
            .map(|a| EncodedAttachment {
                content: BASE64_STANDARD.encode(&a.content),
                filename: a.filename.clone(),
                mime_type: a.mime_type.clone(),
            })
            .collect();
        let attachment_count = attachments.len();

        let request = SendRequest {
            from: sender.into(),
            to: email.to.iter().map(EmailAddress::from).collect(),
            cc: email.cc.iter().map(EmailAddress::from).collect(),
            subject: email.subject.clone(),
            html_content: html.or(text).unwrap_or(FALLBACK_CONTENT).to_string(),
            plain_text_content: text.unwrap_or(FALLBACK_CONTENT).to_string(),
            attachments,
        };

        Ok(MappedRequest {
            request,
            attachment_count,
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}
