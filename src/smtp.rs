//! SMTP server implementation with STARTTLS support.
//!
//! The server consults the [`AcceptancePolicy`] on `MAIL FROM` and
//! `RCPT TO`, and hands every completed `DATA` payload to the
//! [`RelayPipeline`]. The transaction is acknowledged with `250` whatever the
//! relay outcome.

use crate::email::Mailbox;
use crate::policy::AcceptancePolicy;
use crate::relay::RelayPipeline;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Advertised in the EHLO `SIZE` extension and enforced on `MAIL FROM` and
/// `DATA`.
const MAX_MESSAGE_SIZE: usize = 10_485_760;

/// SMTP server configuration.
#[derive(Clone)]
pub struct SmtpConfig {
    pub server_name: String,
    pub tls_acceptor: Option<TlsAcceptor>,
    pub policy: Arc<dyn AcceptancePolicy>,
    pub pipeline: RelayPipeline,
}

/// Run the SMTP server (plain text, with optional STARTTLS).
pub async fn run_smtp_server(
    listener: TcpListener,
    config: SmtpConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("SMTP connection from {addr}");
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, config).await {
                                debug!("SMTP session error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}

/// Run the SMTPS server (TLS from the start).
pub async fn run_smtps_server(
    listener: TcpListener,
    config: SmtpConfig,
    tls_acceptor: TlsAcceptor,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("SMTPS connection from {addr}");
                        let config = config.clone();
                        let acceptor = tls_acceptor.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    let session = Session::new(true);
                                    if let Err(e) = handle_tls_session(tls_stream, session, config, true).await {
                                        debug!("SMTPS session error: {e}");
                                    }
                                }
                                Err(e) => {
                                    debug!("TLS handshake failed: {e}");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}

/// Result of processing a single SMTP command.
enum CommandResult {
    Continue,
    Quit,
    StartTls,
}

/// Handle a plain TCP connection with optional STARTTLS upgrade.
async fn handle_connection(stream: TcpStream, config: SmtpConfig) -> io::Result<()> {
    let mut session = Session::new(false);
    let mut stream = BufStream::new(stream);

    write_greeting(&mut stream, &config).await?;

    loop {
        match process_command(&mut stream, &mut session, &config).await? {
            CommandResult::Continue => {}
            CommandResult::Quit => break,
            CommandResult::StartTls => {
                if let Some(ref acceptor) = config.tls_acceptor {
                    info!("Upgrading connection to TLS");
                    let inner = stream.into_inner();
                    match acceptor.clone().accept(inner).await {
                        Ok(tls_stream) => {
                            session.tls_active = true;
                            session.reset();
                            return handle_tls_session(tls_stream, session, config, false).await;
                        }
                        Err(e) => {
                            debug!("STARTTLS handshake failed: {e}");
                            return Err(io::Error::other(format!("TLS handshake failed: {e}")));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Continue an SMTP session over a TLS stream.
async fn handle_tls_session<S>(
    stream: S,
    mut session: Session,
    config: SmtpConfig,
    greet: bool,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufStream::new(stream);

    if greet {
        write_greeting(&mut stream, &config).await?;
    }

    loop {
        match process_command(&mut stream, &mut session, &config).await? {
            CommandResult::Continue => {}
            CommandResult::Quit => break,
            CommandResult::StartTls => {
                stream.write_all(b"503 TLS already active\r\n").await?;
                stream.flush().await?;
            }
        }
    }

    Ok(())
}

async fn write_greeting<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufStream<S>,
    config: &SmtpConfig,
) -> io::Result<()> {
    stream
        .write_all(format!("220 {} ESMTP smtp-relay\r\n", config.server_name).as_bytes())
        .await?;
    stream.flush().await
}

/// A simple buffered stream wrapper that supports both reading and writing.
struct BufStream<S> {
    inner: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> BufStream<S> {
    fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl<S: AsyncRead + Unpin> AsyncBufRead for BufStream<S> {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().inner).consume(amt);
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for BufStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for BufStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        Pin::new(self.get_mut().inner.get_mut()).poll_write(cx, buf)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(self.get_mut().inner.get_mut()).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(self.get_mut().inner.get_mut()).poll_shutdown(cx)
    }
}

/// Process a single SMTP command.
async fn process_command<S>(
    stream: &mut BufStream<S>,
    session: &mut Session,
    config: &SmtpConfig,
) -> io::Result<CommandResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    let bytes_read = stream.inner.read_until(b'\n', &mut raw).await?;
    if bytes_read == 0 {
        return Ok(CommandResult::Quit);
    }

    let line = String::from_utf8_lossy(&raw);
    let trimmed = line.trim();
    let cmd = trimmed.to_uppercase();

    if cmd.starts_with("EHLO") || cmd.starts_with("HELO") {
        session.reset();
        let name = &config.server_name;
        stream.write_all(format!("250-{name} Hello\r\n").as_bytes()).await?;
        stream
            .write_all(format!("250-SIZE {MAX_MESSAGE_SIZE}\r\n").as_bytes())
            .await?;
        stream.write_all(b"250-8BITMIME\r\n").await?;
        if config.tls_acceptor.is_some() && !session.tls_active {
            stream.write_all(b"250-STARTTLS\r\n").await?;
        }
        stream.write_all(b"250 OK\r\n").await?;
    } else if cmd.starts_with("STARTTLS") {
        if config.tls_acceptor.is_none() {
            stream.write_all(b"454 TLS not available\r\n").await?;
        } else if session.tls_active {
            stream.write_all(b"503 TLS already active\r\n").await?;
        } else {
            stream.write_all(b"220 Ready to start TLS\r\n").await?;
            stream.flush().await?;
            return Ok(CommandResult::StartTls);
        }
    } else if let Some(arg) = command_arg(trimmed, "MAIL FROM:") {
        let (sender, params) = parse_path(arg);
        let declared_size = declared_size(params);
        if declared_size > MAX_MESSAGE_SIZE as u64 {
            session.reset();
            stream
                .write_all(b"552 Message size exceeds fixed maximum message size\r\n")
                .await?;
        } else if config
            .policy
            .decide_sender_acceptance(sender.as_ref(), declared_size)
        {
            session.transaction = Some(Transaction {
                sender,
                recipients: Vec::new(),
            });
            stream.write_all(b"250 OK\r\n").await?;
        } else {
            session.reset();
            stream.write_all(b"550 Sender rejected\r\n").await?;
        }
    } else if let Some(arg) = command_arg(trimmed, "RCPT TO:") {
        match session.transaction.as_mut() {
            None => {
                stream.write_all(b"503 MAIL FROM required first\r\n").await?;
            }
            Some(transaction) => match parse_path(arg).0 {
                None => {
                    stream
                        .write_all(b"501 Syntax error in recipient address\r\n")
                        .await?;
                }
                Some(rcpt) => {
                    if config
                        .policy
                        .decide_recipient_acceptance(Some(&rcpt), transaction.sender.as_ref())
                    {
                        transaction.recipients.push(rcpt);
                        stream.write_all(b"250 OK\r\n").await?;
                    } else {
                        stream.write_all(b"550 Recipient rejected\r\n").await?;
                    }
                }
            },
        }
    } else if cmd == "DATA" {
        match session.transaction.as_ref() {
            None => {
                stream.write_all(b"503 MAIL FROM required first\r\n").await?;
            }
            Some(transaction) if transaction.recipients.is_empty() => {
                stream.write_all(b"503 RCPT TO required first\r\n").await?;
            }
            Some(_) => {
                stream
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                stream.flush().await?;

                let payload = read_data(&mut stream.inner, MAX_MESSAGE_SIZE).await?;
                session.reset();
                match payload {
                    Some(data) => {
                        let id = Uuid::new_v4().simple().to_string();
                        let outcome = config
                            .pipeline
                            .relay(&data)
                            .instrument(info_span!("relay", id = %id))
                            .await;
                        debug!(id = %id, state = ?outcome.state, "Transaction complete");
                        stream.write_all(b"250 OK: queued\r\n").await?;
                    }
                    None => {
                        debug!(max = MAX_MESSAGE_SIZE, "Message too large, discarded");
                        stream
                            .write_all(b"552 Message size exceeds fixed maximum message size\r\n")
                            .await?;
                    }
                }
            }
        }
    } else if cmd == "RSET" {
        session.reset();
        stream.write_all(b"250 OK\r\n").await?;
    } else if cmd == "NOOP" {
        stream.write_all(b"250 OK\r\n").await?;
    } else if cmd == "QUIT" {
        stream.write_all(b"221 Bye\r\n").await?;
        stream.flush().await?;
        return Ok(CommandResult::Quit);
    } else {
        stream.write_all(b"500 Command not recognized\r\n").await?;
    }

    stream.flush().await?;
    Ok(CommandResult::Continue)
}

struct Session {
    transaction: Option<Transaction>,
    tls_active: bool,
}

/// Envelope collected between `MAIL FROM` and the end of `DATA`.
struct Transaction {
    /// `None` for the null reverse path `<>`.
    sender: Option<Mailbox>,
    recipients: Vec<Mailbox>,
}

impl Session {
    const fn new(tls_active: bool) -> Self {
        Self {
            transaction: None,
            tls_active,
        }
    }

    fn reset(&mut self) {
        self.transaction = None;
    }
}

/// Argument following a case-insensitive command prefix.
fn command_arg<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

/// Split a `MAIL FROM`/`RCPT TO` argument into its mailbox and the trailing
/// ESMTP parameters. An empty path (`<>`) yields `None`.
fn parse_path(s: &str) -> (Option<Mailbox>, &str) {
    let s = s.trim();
    let (addr, params) = match (s.find('<'), s.find('>')) {
        (Some(start), Some(end)) if start < end => (&s[start + 1..end], &s[end + 1..]),
        _ => s.split_once(char::is_whitespace).unwrap_or((s, "")),
    };
    let addr = addr.trim();
    let mailbox = (!addr.is_empty()).then(|| Mailbox::new(addr));
    (mailbox, params)
}

/// Value of the `SIZE=` ESMTP parameter, `0` when absent or unparseable.
fn declared_size(params: &str) -> u64 {
    params
        .split_whitespace()
        .find_map(|p| {
            let (key, value) = p.split_once('=')?;
            if key.eq_ignore_ascii_case("SIZE") {
                value.parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

/// Read the DATA payload up to the `.` terminator line, undoing dot-stuffing.
///
/// Returns `None` when the payload exceeds `max_size`; the rest of the payload
/// is still consumed so the session stays in sync. EOF before the terminator is
/// an `UnexpectedEof` error and nothing is returned.
async fn read_data<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> io::Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    let mut line = Vec::new();
    let mut oversized = false;

    loop {
        line.clear();
        let bytes_read = reader.read_until(b'\n', &mut line).await?;
        if bytes_read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of DATA",
            ));
        }
        if line == b".\r\n" || line == b".\n" {
            break;
        }
        if oversized {
            continue;
        }
        let content = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
        if data.len() + content.len() > max_size {
            oversized = true;
            data = Vec::new();
            continue;
        }
        data.extend_from_slice(content);
    }

    Ok((!oversized).then_some(data))
}
