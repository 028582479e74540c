//! Outbound SMTP client
//!
//! One connection per delivery attempt: greeting, EHLO (HELO when EHLO is
//! refused), STARTTLS when the exchanger offers it, then MAIL/RCPT/DATA and
//! QUIT. Every network step is bounded by the configured connect or command
//! timeout.

use crate::error::{MailError, Result};
use async_trait::async_trait;
use rustls::{ClientConfig, RootCertStore, ServerName};
use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Hands one message for one recipient to one exchanger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, host: &str, from: &str, to: &str, content: &[u8]) -> Result<()>;
}

/// Build a STARTTLS connector trusting the certificates in `ca_file`
///
/// Returns `None` (relay stays in clear) when no usable trust roots exist.
pub fn tls_connector(ca_file: Option<&str>) -> Option<TlsConnector> {
    let path = ca_file?;

    let certs = match File::open(path).and_then(|f| rustls_pemfile::certs(&mut StdBufReader::new(f))) {
        Ok(certs) => certs,
        Err(e) => {
            warn!("Cannot load CA bundle {}: {}; outbound STARTTLS disabled", path, e);
            return None;
        }
    };

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(&certs);
    if added == 0 {
        warn!("CA bundle {} holds no usable certificates; outbound STARTTLS disabled", path);
        return None;
    }
    debug!("Loaded {} trust roots ({} ignored)", added, ignored);

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Some(TlsConnector::from(Arc::new(config)))
}

pub struct SmtpClient {
    /// Name announced in EHLO
    hostname: String,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    tls: Option<TlsConnector>,
}

impl SmtpClient {
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        command_timeout: Duration,
        tls: Option<TlsConnector>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            connect_timeout,
            command_timeout,
            tls,
        }
    }
}

#[async_trait]
impl Transport for SmtpClient {
    async fn send(&self, host: &str, from: &str, to: &str, content: &[u8]) -> Result<()> {
        let addr = format!("{}:{}", host, self.port);
        info!("Sending mail from {} to {} via {}", from, to, addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MailError::Delivery(format!("connection to {} timed out", addr)))??;

        let mut session = Session::new(stream, self.command_timeout);
        session.expect_reply(2, "greeting").await?;
        let ehlo = session.exchange(&format!("EHLO {}", self.hostname)).await?;
        let ehlo = match ehlo.code / 100 {
            2 => ehlo,
            // Pre-ESMTP exchanger: plain HELO, no extensions
            5 => {
                debug!("{} refused EHLO with {}, falling back to HELO", host, ehlo.code);
                session.command(&format!("HELO {}", self.hostname), 2).await?
            }
            _ => return Err(ehlo.rejected("EHLO")),
        };

        if ehlo.offers("STARTTLS") {
            match &self.tls {
                Some(connector) => {
                    session.command("STARTTLS", 2).await?;
                    let server_name = ServerName::try_from(host)
                        .map_err(|e| MailError::Tls(format!("Invalid server name {}: {}", host, e)))?;
                    let tls_stream = timeout(
                        self.command_timeout,
                        connector.connect(server_name, session.into_inner()),
                    )
                    .await
                    .map_err(|_| MailError::Tls(format!("TLS handshake with {} timed out", host)))?
                    .map_err(|e| MailError::Tls(format!("TLS handshake with {} failed: {}", host, e)))?;
                    debug!("STARTTLS established with {}", host);

                    let mut session = Session::new(tls_stream, self.command_timeout);
                    session.command(&format!("EHLO {}", self.hostname), 2).await?;
                    return session.transaction(from, to, content).await;
                }
                None => warn!("{} offers STARTTLS but no trust roots are configured", host),
            }
        }

        session.transaction(from, to, content).await
    }
}

/// Final reply to a command, continuation lines folded in
#[derive(Debug)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    /// EHLO keyword check, ignoring parameters and case
    fn offers(&self, extension: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .map_or(false, |keyword| keyword.eq_ignore_ascii_case(extension))
        })
    }

    fn text(&self) -> String {
        self.lines.join(" ")
    }

    fn expect(self, class: u16, step: &str) -> Result<Self> {
        if self.code / 100 != class {
            return Err(self.rejected(step));
        }
        Ok(self)
    }

    fn rejected(&self, step: &str) -> MailError {
        MailError::SmtpProtocol(format!("{} rejected: {} {}", step, self.code, self.text()))
    }
}

struct Session<S> {
    stream: BufReader<S>,
    command_timeout: Duration,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S, command_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            command_timeout,
        }
    }

    fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    async fn transaction(&mut self, from: &str, to: &str, content: &[u8]) -> Result<()> {
        self.command(&format!("MAIL FROM:<{}>", from), 2).await?;
        self.command(&format!("RCPT TO:<{}>", to), 2).await?;
        self.command("DATA", 3).await?;

        let data = dot_stuff(content);
        timeout(self.command_timeout, self.send_raw(&data))
            .await
            .map_err(|_| MailError::Delivery("timed out sending message data".to_string()))??;
        self.expect_reply(2, "end of data").await?;

        // The message is accepted at this point
        if let Err(e) = self.command("QUIT", 2).await {
            debug!("QUIT failed after successful delivery: {}", e);
        }

        info!("Mail sent successfully to {}", to);
        Ok(())
    }

    /// Send one command line and check the reply class
    async fn command(&mut self, line: &str, class: u16) -> Result<Reply> {
        self.exchange(line).await?.expect(class, step(line))
    }

    /// Send one command line and return whatever the exchanger answered
    async fn exchange(&mut self, line: &str) -> Result<Reply> {
        debug!("> {}", line);
        timeout(
            self.command_timeout,
            self.send_raw(format!("{}\r\n", line).as_bytes()),
        )
        .await
        .map_err(|_| MailError::Delivery(format!("timed out sending {}", line)))??;

        self.next_reply(step(line)).await
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    async fn expect_reply(&mut self, class: u16, step: &str) -> Result<Reply> {
        self.next_reply(step).await?.expect(class, step)
    }

    async fn next_reply(&mut self, step: &str) -> Result<Reply> {
        timeout(self.command_timeout, self.read_reply())
            .await
            .map_err(|_| MailError::Delivery(format!("timed out waiting for {} reply", step)))?
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(MailError::SmtpProtocol("connection closed by server".to_string()));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            debug!("< {}", line);

            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| MailError::SmtpProtocol(format!("malformed reply: {}", line)))?;
            let last = !line[3..].starts_with('-');
            lines.push(line.get(4..).unwrap_or_default().to_string());

            if last {
                return Ok(Reply { code, lines });
            }
        }
    }
}

/// Command name used in errors, without the address argument
fn step(line: &str) -> &str {
    line.split(':').next().unwrap_or(line)
}

/// Escape leading dots and append the end-of-data marker
fn dot_stuff(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 8);
    let mut line_start = true;

    for &byte in content {
        if line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        line_start = byte == b'\n';
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
