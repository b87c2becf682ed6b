//! Sender and recipient acceptance policies.
//!
//! The protocol engine consults an [`AcceptancePolicy`] on every `MAIL FROM`
//! and `RCPT TO`. Implementations supply only the predicates; the provided
//! `decide_*` methods wrap them with the debug record every decision emits.

use tracing::debug;

use crate::email::{Mailbox, UNKNOWN};

/// Pluggable accept/reject decision for SMTP envelopes.
///
/// Both predicates are synchronous and must not fail.
pub trait AcceptancePolicy: Send + Sync {
    /// Whether a transaction from `sender` may start. `declared_size` is the
    /// `SIZE=` parameter, `0` when the client did not declare one.
    fn permits_sender(&self, sender: Option<&Mailbox>, declared_size: u64) -> bool;

    /// Whether `recipient` may be added to the current transaction.
    fn permits_recipient(&self, recipient: Option<&Mailbox>, sender: Option<&Mailbox>) -> bool;

    /// Returns the name of this policy.
    fn name(&self) -> &str;

    /// Decide on a proposed sender and log the decision.
    fn decide_sender_acceptance(&self, sender: Option<&Mailbox>, declared_size: u64) -> bool {
        let accept = self.permits_sender(sender, declared_size);
        let from = display(sender);
        if declared_size > 0 {
            debug!(
                policy = self.name(),
                from = %from,
                size = declared_size,
                accept,
                "Accepting message from {from} with size {declared_size}"
            );
        } else {
            debug!(
                policy = self.name(),
                from = %from,
                accept,
                "Accepting message from {from}, size not declared"
            );
        }
        accept
    }

    /// Decide on a proposed recipient and log the decision.
    fn decide_recipient_acceptance(
        &self,
        recipient: Option<&Mailbox>,
        sender: Option<&Mailbox>,
    ) -> bool {
        let accept = self.permits_recipient(recipient, sender);
        let from = display(sender);
        let to = display(recipient);
        debug!(
            policy = self.name(),
            from = %from,
            from_domain = sender.and_then(Mailbox::domain),
            to = %to,
            to_domain = recipient.and_then(Mailbox::domain),
            accept,
            "Delivering message from {from} to {to}"
        );
        accept
    }
}

fn display(mb: Option<&Mailbox>) -> String {
    mb.map_or_else(|| UNKNOWN.to_string(), ToString::to_string)
}

/// Accepts every sender and recipient.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl AcceptancePolicy for AcceptAll {
    fn permits_sender(&self, _sender: Option<&Mailbox>, _declared_size: u64) -> bool {
        true
    }

    fn permits_recipient(&self, _recipient: Option<&Mailbox>, _sender: Option<&Mailbox>) -> bool {
        true
    }

    fn name(&self) -> &str {
        "accept_all"
    }
}

/// Accepts only senders on a case-insensitive allow list. Recipients are not
/// restricted; the null sender (`MAIL FROM:<>`) is rejected.
#[derive(Debug, Clone, Default)]
pub struct SenderAllowList {
    allowed: Vec<String>,
}

impl SenderAllowList {
    /// Build from raw entries; blanks are dropped and entries lowercased.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = entries
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { allowed }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl AcceptancePolicy for SenderAllowList {
    fn permits_sender(&self, sender: Option<&Mailbox>, _declared_size: u64) -> bool {
        sender.is_some_and(|mb| {
            let address = mb.address.to_lowercase();
            self.allowed.iter().any(|a| *a == address)
        })
    }

    fn permits_recipient(&self, _recipient: Option<&Mailbox>, _sender: Option<&Mailbox>) -> bool {
        true
    }

    fn name(&self) -> &str {
        "sender_allow_list"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all() {
        let policy = AcceptAll;
        let sender = Mailbox::new("a@x.com");
        assert!(policy.decide_sender_acceptance(Some(&sender), 0));
        assert!(policy.decide_sender_acceptance(None, 2048));
        assert!(policy.decide_recipient_acceptance(None, None));
        assert!(policy.decide_recipient_acceptance(Some(&Mailbox::new("b@y.com")), Some(&sender)));
    }

    #[test]
    fn test_allow_list_is_case_insensitive() {
        let policy = SenderAllowList::new([" Alice@Example.com ", ""]);
        assert!(!policy.is_empty());
        assert!(policy.decide_sender_acceptance(Some(&Mailbox::new("alice@example.COM")), 0));
        assert!(!policy.decide_sender_acceptance(Some(&Mailbox::new("mallory@example.com")), 0));
        assert!(!policy.decide_sender_acceptance(None, 0));
        assert!(policy.decide_recipient_acceptance(Some(&Mailbox::new("anyone@else.org")), None));
    }
}
