use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{ReconError, Result};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress of one rotation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Disconnected,
    Connected,
    Authenticated,
    RotationSent,
    Verified,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Disconnected => "disconnected",
            CircuitState::Connected => "connected",
            CircuitState::Authenticated => "authenticated",
            CircuitState::RotationSent => "rotation-sent",
            CircuitState::Verified => "verified",
        };
        f.write_str(s)
    }
}

/// A complete control-port reply: status code plus every line's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl ControlReply {
    pub fn is_ok(&self) -> bool {
        self.code == 250
    }

    pub fn message(&self) -> String {
        format!("{} {}", self.code, self.lines.join(" / "))
    }
}

/// Splits `NNN<sep>text` into code, whether this is the last line, and text.
/// `-` marks a mid-reply line, `+` opens a data block ending in a lone `.`.
fn parse_reply_line(line: &str) -> Result<(u16, char, String)> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.len() < 3 || !line.is_char_boundary(3) {
        return Err(ReconError::Protocol(format!("malformed reply line: {:?}", line)));
    }
    let code: u16 = line[..3]
        .parse()
        .map_err(|_| ReconError::Protocol(format!("reply without status code: {:?}", line)))?;
    let mut rest = line[3..].chars();
    let sep = rest.next().unwrap_or(' ');
    Ok((code, sep, rest.collect()))
}

/// One authenticated conversation with the Tor control port. Opened per
/// rotation request and dropped afterwards.
pub struct ControlSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    state: CircuitState,
}

impl ControlSession {
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_within(addr, REPLY_TIMEOUT).await
    }

    /// A silently dropped SYN fails after `limit` rather than the OS connect timeout.
    pub async fn connect_within(addr: &str, limit: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| ReconError::Protocol(format!("control port {} did not answer within {:?}", addr, limit)))?
            .map_err(|e| ReconError::Protocol(format!("cannot connect to control port {}: {}", addr, e)))?;
        let (read, write) = stream.into_split();
        tracing::debug!("control port {} connected", addr);
        Ok(Self { reader: BufReader::new(read), writer: write, state: CircuitState::Connected })
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub async fn authenticate(&mut self, cookie: &[u8]) -> Result<ControlReply> {
        if self.state != CircuitState::Connected {
            return Err(ReconError::Protocol(format!("cannot authenticate while {}", self.state)));
        }
        let reply = self.command(&format!("AUTHENTICATE {}", hex::encode(cookie))).await?;
        if !reply.is_ok() {
            return Err(ReconError::Protocol(format!("authentication failed: {}", reply.message())));
        }
        self.state = CircuitState::Authenticated;
        Ok(reply)
    }

    /// Asks Tor for a fresh identity. Nothing is written unless authenticated.
    pub async fn signal_newnym(&mut self) -> Result<ControlReply> {
        if self.state != CircuitState::Authenticated {
            return Err(ReconError::Protocol(format!("NEWNYM refused while {}", self.state)));
        }
        let reply = self.command("SIGNAL NEWNYM").await?;
        if !reply.is_ok() {
            return Err(ReconError::Protocol(format!("NEWNYM rejected: {}", reply.message())));
        }
        self.state = CircuitState::RotationSent;
        Ok(reply)
    }

    async fn command(&mut self, line: &str) -> Result<ControlReply> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        tokio::time::timeout(REPLY_TIMEOUT, self.read_reply())
            .await
            .map_err(|_| ReconError::Protocol("timed out waiting for reply".to_string()))?
    }

    async fn read_reply(&mut self) -> Result<ControlReply> {
        let mut lines = Vec::new();
        loop {
            let line = self.next_line().await?;
            let (code, sep, text) = parse_reply_line(&line)?;
            lines.push(text);
            match sep {
                '-' => continue,
                '+' => {
                    // data block, terminated by "."
                    loop {
                        let data = self.next_line().await?;
                        if data.trim_end() == "." {
                            break;
                        }
                    }
                }
                _ => return Ok(ControlReply { code, lines }),
            }
        }
    }

    async fn next_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ReconError::Protocol("control port closed the connection".to_string()));
        }
        Ok(line)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts one connection, answers each received line with the next canned
    /// reply and returns every line it saw once the client hangs up.
    pub(crate) async fn fake_control_port(replies: Vec<&'static str>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut replies = replies.into_iter();
            let mut received = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                received.push(line);
                if let Some(reply) = replies.next() {
                    write.write_all(reply.as_bytes()).await.unwrap();
                }
            }
            received
        });
        (addr, handle)
    }

    #[test]
    fn reply_line_parsing() {
        assert_eq!(parse_reply_line("250 OK\r\n").unwrap(), (250, ' ', "OK".to_string()));
        assert_eq!(parse_reply_line("250-version=0.4").unwrap(), (250, '-', "version=0.4".to_string()));
        assert_eq!(parse_reply_line("515 Authentication failed").unwrap().0, 515);
        assert!(parse_reply_line("OK").is_err());
        assert!(parse_reply_line("abc nope").is_err());
    }

    #[tokio::test]
    async fn failed_authentication_stays_connected_and_sends_no_signal() {
        let (addr, server) = fake_control_port(vec!["515 Authentication failed: Wrong length on authentication cookie.\r\n"]).await;
        let mut session = ControlSession::connect(&addr).await.unwrap();
        assert_eq!(session.state(), CircuitState::Connected);

        let err = session.authenticate(&[0x01, 0x02]).await.unwrap_err();
        assert!(matches!(err, ReconError::Protocol(_)));
        assert_eq!(session.state(), CircuitState::Connected);

        assert!(session.signal_newnym().await.is_err());
        assert_eq!(session.state(), CircuitState::Connected);
        drop(session);

        let received = server.await.unwrap();
        assert_eq!(received, vec!["AUTHENTICATE 0102".to_string()]);
    }

    #[tokio::test]
    async fn successful_rotation_walks_the_states() {
        let (addr, server) = fake_control_port(vec!["250 OK\r\n", "250 OK\r\n"]).await;
        let mut session = ControlSession::connect(&addr).await.unwrap();
        session.authenticate(&[0x0a, 0x0b]).await.unwrap();
        assert_eq!(session.state(), CircuitState::Authenticated);
        session.signal_newnym().await.unwrap();
        assert_eq!(session.state(), CircuitState::RotationSent);
        drop(session);

        let received = server.await.unwrap();
        assert_eq!(received, vec!["AUTHENTICATE 0a0b".to_string(), "SIGNAL NEWNYM".to_string()]);
    }

    #[tokio::test]
    async fn multi_line_reply_is_read_to_the_end() {
        let (addr, _server) = fake_control_port(vec!["250-AUTH METHODS=COOKIE\r\n250 OK\r\n"]).await;
        let mut session = ControlSession::connect(&addr).await.unwrap();
        let reply = session.authenticate(b"c").await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines, vec!["AUTH METHODS=COOKIE".to_string(), "OK".to_string()]);
    }

    #[tokio::test]
    async fn rejected_newnym_is_a_protocol_error() {
        let (addr, _server) = fake_control_port(vec!["250 OK\r\n", "552 Unrecognized signal\r\n"]).await;
        let mut session = ControlSession::connect(&addr).await.unwrap();
        session.authenticate(b"c").await.unwrap();
        assert!(session.signal_newnym().await.is_err());
        assert_eq!(session.state(), CircuitState::Authenticated);
    }

    #[tokio::test]
    async fn unreachable_control_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(ControlSession::connect(&addr).await, Err(ReconError::Protocol(_))));
    }

    #[tokio::test]
    async fn silent_control_port_gives_up_on_time() {
        // TEST-NET-1 is never routed, so the connect either hangs or fails at once
        let started = std::time::Instant::now();
        let res = ControlSession::connect_within("192.0.2.1:9051", Duration::from_millis(200)).await;
        assert!(matches!(res, Err(ReconError::Protocol(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
