//! Raw payload to [`StructuredEmail`] decoding.

use mail_parser::{Address, Message, MessageParser, MessagePart, MimeHeaders, PartType};

use crate::email::{Attachment, Mailbox, StructuredEmail};
use crate::error::RelayError;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Turns the bytes received after `DATA` into a [`StructuredEmail`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDecoder;

impl MessageDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a raw RFC 5322 payload.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedMessage`] if the payload is empty, has no
    /// header block, or contains an attachment the parser could not decode.
    pub fn decode(&self, raw: &[u8]) -> Result<StructuredEmail, RelayError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(RelayError::MalformedMessage("empty payload".into()));
        }

        let msg = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| RelayError::MalformedMessage("unparseable MIME structure".into()))?;

        if msg.headers().is_empty() {
            return Err(RelayError::MalformedMessage("missing header block".into()));
        }

        let sender = msg.from().and_then(|addr| mailboxes(addr).next());
        let to = msg.to().map(|addr| mailboxes(addr).collect()).unwrap_or_default();
        let cc = msg.cc().map(|addr| mailboxes(addr).collect()).unwrap_or_default();

        Ok(StructuredEmail {
            sender,
            to,
            cc,
            subject: msg.subject().map(String::from),
            html_body: first_body(&msg, &msg.html_body, true),
            text_body: first_body(&msg, &msg.text_body, false),
            attachments: attachments(&msg)?,
        })
    }
}

/// Payload size in kilobytes rounded to two decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn payload_size_kb(len: usize) -> f64 {
    (len as f64 / 1024.0 * 100.0).round() / 100.0
}

/// Mailboxes in declared order, group members flattened; entries without an
/// address (bare group names, `undisclosed-recipients:;`) are dropped.
fn mailboxes<'a>(addr: &'a Address<'a>) -> impl Iterator<Item = Mailbox> + 'a {
    addr.iter().filter_map(|a| {
        let address = a.address().map(str::trim).filter(|s| !s.is_empty())?;
        Some(Mailbox {
            address: address.to_string(),
            name: a.name().map(String::from).filter(|n| !n.is_empty()),
        })
    })
}

/// First body part of the requested kind. `mail-parser` converts between
/// text and HTML when one of them is missing; only genuine parts count here.
fn first_body(msg: &Message<'_>, ids: &[usize], html: bool) -> Option<String> {
    let part = msg.part(*ids.first()?)?;
    match (&part.body, html) {
        (PartType::Html(body), true) | (PartType::Text(body), false) => {
            Some(body.to_string()).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

fn attachments(msg: &Message<'_>) -> Result<Vec<Attachment>, RelayError> {
    msg.attachments()
        .filter(|part| is_attachment(part))
        .enumerate()
        .map(|(idx, part)| {
            let filename = part
                .attachment_name()
                .map_or_else(|| format!("attachment_{idx}"), String::from);

            if part.is_encoding_problem {
                return Err(RelayError::MalformedMessage(format!(
                    "attachment '{filename}' could not be decoded"
                )));
            }

            let mime_type = part.content_type().map_or_else(
                || DEFAULT_MIME_TYPE.to_string(),
                |ct| {
                    ct.subtype().map_or_else(
                        || ct.ctype().to_string(),
                        |subtype| format!("{}/{}", ct.ctype(), subtype),
                    )
                },
            );

            Ok(Attachment {
                filename,
                mime_type,
                content: part.contents().to_vec(),
            })
        })
        .collect()
}

/// Explicit `attachment` disposition, or no disposition but a file name.
fn is_attachment(part: &MessagePart<'_>) -> bool {
    match part.content_disposition() {
        Some(disposition) => disposition.ctype().eq_ignore_ascii_case("attachment"),
        None => part.attachment_name().is_some(),
    }
}
