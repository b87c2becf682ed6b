//! SendGrid v3 `mail/send` provider.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use super::{DeliveryFuture, DeliveryProvider};
use crate::error::DeliveryError;
use crate::mapper::{EmailAddress, EncodedAttachment, SendRequest};

/// Production endpoint of the SendGrid v3 mail send API.
pub const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// Sends mail through the SendGrid HTTP API.
pub struct SendGridProvider {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
}

impl SendGridProvider {
    /// Create a provider using the production endpoint.
    #[must_use]
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: SENDGRID_ENDPOINT.to_string(),
        }
    }

    /// Point the provider at a different API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl DeliveryProvider for SendGridProvider {
    fn send<'a>(&'a self, request: &'a SendRequest) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let body = MailSend::from(request);
            debug!(endpoint = %self.endpoint, "Posting message to SendGrid");

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(status.as_u16());
            }

            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            })
        })
    }

    fn name(&self) -> &str {
        "sendgrid"
    }
}

/// Request body of `POST /v3/mail/send`.
#[derive(Debug, Serialize)]
pub(crate) struct MailSend<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    /// SendGrid requires `text/plain` before `text/html`.
    content: [Content<'a>; 2],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    to: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    mime_type: &'a str,
    filename: &'a str,
    disposition: &'static str,
}

impl<'a> From<&'a EmailAddress> for Address<'a> {
    fn from(addr: &'a EmailAddress) -> Self {
        Self {
            email: &addr.email,
            name: addr.name.as_deref(),
        }
    }
}

impl<'a> From<&'a EncodedAttachment> for Attachment<'a> {
    fn from(att: &'a EncodedAttachment) -> Self {
        Self {
            content: &att.content,
            mime_type: &att.mime_type,
            filename: &att.filename,
            disposition: "attachment",
        }
    }
}

impl<'a> From<&'a SendRequest> for MailSend<'a> {
    fn from(req: &'a SendRequest) -> Self {
        Self {
            personalizations: [Personalization {
                to: req.to.iter().map(Address::from).collect(),
                cc: req.cc.iter().map(Address::from).collect(),
            }],
            from: Address::from(&req.from),
            subject: req.subject.as_deref(),
            content: [
                Content {
                    kind: "text/plain",
                    value: &req.plain_text_content,
                },
                Content {
                    kind: "text/html",
                    value: &req.html_content,
                },
            ],
            attachments: req.attachments.iter().map(Attachment::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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
            cc: Vec::new(),
            subject: None,
            html_content: "<p>Hello</p>".into(),
            plain_text_content: "Hello".into(),
            attachments: vec![EncodedAttachment {
                content: "aGk=".into(),
                filename: "hi.txt".into(),
                mime_type: "text/plain".into(),
            }],
        }
    }

    #[test]
    fn test_mail_send_wire_format() {
        let req = request();
        let value = serde_json::to_value(MailSend::from(&req)).unwrap();
        assert_eq!(
            value,
            json!({
                "personalizations": [{ "to": [{ "email": "b@y.com" }] }],
                "from": { "email": "a@x.com", "name": "Alice" },
                "content": [
                    { "type": "text/plain", "value": "Hello" },
                    { "type": "text/html", "value": "<p>Hello</p>" }
                ],
                "attachments": [{
                    "content": "aGk=",
                    "type": "text/plain",
                    "filename": "hi.txt",
                    "disposition": "attachment"
                }]
            })
        );
    }

    #[test]
    fn test_endpoint_override() {
        let provider = SendGridProvider::new(SecretString::from("key"))
            .with_endpoint("http://127.0.0.1:9/v3/mail/send");
        assert_eq!(provider.endpoint(), "http://127.0.0.1:9/v3/mail/send");
        assert_eq!(provider.name(), "sendgrid");
    }
}
