//! Decoded, provider-independent email types.

use std::fmt;

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub address: String,
    pub name: Option<String>,
}

impl Mailbox {
    /// Create a mailbox without a display name.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    /// Create a mailbox with a display name.
    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Part of the address before the last `@`.
    #[must_use]
    pub fn local_part(&self) -> Option<&str> {
        self.address
            .rsplit_once('@')
            .map(|(local, _)| local)
            .filter(|s| !s.is_empty())
    }

    /// Host component of the address, if it has one.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.address
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|s| !s.is_empty())
    }

    /// Whether the address has any non-whitespace content.
    #[must_use]
    pub fn has_address(&self) -> bool {
        !self.address.trim().is_empty()
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// A file attached to a message, already transfer-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// A message as read from the wire, before any provider mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredEmail {
    pub sender: Option<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Sentinel used in logs for an absent sender or subject.
pub(crate) const UNKNOWN: &str = "<unknown>";

/// Sentinel used in logs for an empty recipient list.
pub(crate) const NONE: &str = "<none>";

impl StructuredEmail {
    /// Sender rendered for log records.
    #[must_use]
    pub fn sender_summary(&self) -> String {
        self.sender
            .as_ref()
            .map_or_else(|| UNKNOWN.to_string(), ToString::to_string)
    }

    /// To list rendered for log records, comma-joined.
    #[must_use]
    pub fn recipient_summary(&self) -> String {
        if self.to.is_empty() {
            return NONE.to_string();
        }
        self.to
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Subject rendered for log records.
    #[must_use]
    pub fn subject_summary(&self) -> &str {
        self.subject.as_deref().unwrap_or(UNKNOWN)
    }
}
