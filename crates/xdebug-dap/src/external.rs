//! External registration clients (§6): thin wire clients for a DBGp proxy
//! (`proxyinit`/`proxystop`) and for Xdebug Cloud (`cloudinit`/`cloudstop`).
//! Both ride a single one-shot request/reply over their own `TcpStream`,
//! framed exactly like an engine connection — a bare NUL-terminated command
//! line out, a length-prefixed XML frame back — but neither is a DBGp
//! connection itself (no transaction pipeline, no `status`/`run` surface).

use std::sync::Arc;
use std::time::Duration;

use dbgp_frame::{FrameDecoder, encode_command};
use dbgp_wire::DbgpError;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Default time to wait for a registration reply before giving up.
const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// The outcome of a `proxyinit`/`proxystop`/`cloudinit`/`cloudstop` round
/// trip: the root element's `success` attribute, plus the nested
/// `<error><message>` text when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReply {
    /// `true` when `success="1"`.
    pub success: bool,
    /// The engine-supplied failure reason, if `success="0"` carried one.
    pub error_message: Option<String>,
}

async fn round_trip<S>(stream: &mut S, command: &str) -> Result<RegistrationReply, DbgpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&encode_command(command))
        .await
        .map_err(|e| DbgpError::TransportError(e.to_string()))?;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = timeout(DEFAULT_REGISTRATION_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| DbgpError::TransportError("timed out waiting for a reply".to_string()))?
            .map_err(|e| DbgpError::TransportError(e.to_string()))?;
        if n == 0 {
            return Err(DbgpError::ConnectionClosed);
        }
        for result in decoder.push(&buf[..n]) {
            let xml = result.map_err(|e| DbgpError::ParseError(e.to_string()))?;
            return parse_registration_reply(&xml);
        }
    }
}

fn parse_registration_reply(xml: &[u8]) -> Result<RegistrationReply, DbgpError> {
    let text =
        std::str::from_utf8(xml).map_err(|e| DbgpError::ParseError(format!("body is not UTF-8: {e}")))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut success = false;
    let mut in_message = false;
    let mut message: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| DbgpError::ParseError(format!("invalid XML: {e}")))?;
        match event {
            Event::Eof => break,
            Event::Start(tag) | Event::Empty(tag) => {
                let local = local_name(tag.name().as_ref());
                if local == "message" {
                    in_message = true;
                } else if local.ends_with("init") || local.ends_with("stop") {
                    for attr in tag.attributes().flatten() {
                        if attr.key.as_ref() == b"success" {
                            let value = attr.decode_and_unescape_value(reader.decoder()).unwrap_or_default();
                            success = value.as_ref() == "1";
                        }
                    }
                }
            }
            Event::Text(text) => {
                if in_message {
                    let decoded = text.unescape().map(|c| c.into_owned()).unwrap_or_default();
                    message.get_or_insert_with(String::new).push_str(&decoded);
                }
            }
            Event::End(tag) => {
                if local_name(tag.name().as_ref()) == "message" {
                    in_message = false;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(RegistrationReply { success, error_message: message })
}

fn local_name(qualified: &[u8]) -> String {
    let full = String::from_utf8_lossy(qualified);
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

/// A thin client for DBGp proxy registration (`proxyinit`/`proxystop`).
///
/// Distinct from [`dbgp_connection::Connection`]: a proxy registration
/// socket carries exactly one command and one reply, never a sustained
/// transaction pipeline.
pub struct ProxyClient {
    stream: TcpStream,
}

impl ProxyClient {
    /// Open the registration socket. Does not send `proxyinit` yet.
    pub async fn connect(host: &str, port: u16) -> Result<Self, DbgpError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| DbgpError::TransportError(e.to_string()))?;
        Ok(Self { stream })
    }

    /// Register this IDE with the proxy so it forwards matching engine
    /// connections to `ide_port`. `multi` allows more than one engine
    /// session to share the same IDE key concurrently.
    pub async fn init(&mut self, key: &str, ide_port: u16, multi: bool) -> Result<RegistrationReply, DbgpError> {
        let command = format!("proxyinit -k {key} -p {ide_port} -m {}", u8::from(multi));
        round_trip(&mut self.stream, &command).await
    }

    /// Deregister this IDE key from the proxy.
    pub async fn stop(&mut self, key: &str) -> Result<RegistrationReply, DbgpError> {
        round_trip(&mut self.stream, &format!("proxystop -k {key}")).await
    }
}

/// The fixed TCP port the Xdebug Cloud relay listens on.
pub const CLOUD_PORT: u16 = 9021;

/// Build a `rustls` client config trusting the platform's native root store.
fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    let (_added, _rejected) = roots.add_parsable_certificates(loaded.certs);

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// A thin client for Xdebug Cloud relay registration (`cloudinit`/
/// `cloudstop`). The relay terminates TLS itself, so every byte after the
/// raw TCP connect rides the same `TlsStream`; after a successful `init` that
/// socket carries multiplexed engine `init` frames, one per debuggee that
/// connects through the relay, but this type only covers the registration
/// handshake itself.
pub struct CloudClient {
    stream: TlsStream<TcpStream>,
}

impl CloudClient {
    /// Pick the relay host for `token`: CRC-32 the token, take the low 4
    /// bits of the digest's 4th byte (`checksum.to_be_bytes()[3]`) as a
    /// letter `a`-`p`, and append the fixed cloud domain.
    #[must_use]
    pub fn host_for_token(token: &str) -> String {
        let checksum = crc32fast::hash(token.as_bytes());
        let fourth_byte = checksum.to_be_bytes()[3];
        let letter = (b'a' + (fourth_byte & 0x0F)) as char;
        format!("{letter}.cloud.xdebug.com")
    }

    /// Connect to the relay host selected for `token` and complete the TLS
    /// handshake over it.
    pub async fn connect_for_token(token: &str) -> Result<Self, DbgpError> {
        let host = Self::host_for_token(token);
        let tcp_stream = TcpStream::connect((host.as_str(), CLOUD_PORT))
            .await
            .map_err(|e| DbgpError::TransportError(e.to_string()))?;

        let server_name = ServerName::try_from(host).map_err(|e| DbgpError::TransportError(e.to_string()))?;
        let stream = tls_connector()
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| DbgpError::TransportError(e.to_string()))?;
        Ok(Self { stream })
    }

    /// Register `token` with the relay so it starts forwarding debuggee
    /// connections for that token as multiplexed `init` frames.
    pub async fn init(&mut self, token: &str) -> Result<RegistrationReply, DbgpError> {
        round_trip(&mut self.stream, &format!("cloudinit -i 1 -u {token}")).await
    }

    /// Deregister `token` from the relay.
    pub async fn stop(&mut self, token: &str) -> Result<RegistrationReply, DbgpError> {
        round_trip(&mut self.stream, &format!("cloudstop -i 2 -u {token}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;
    use tokio::net::TcpListener;

    #[test]
    fn host_for_token_picks_a_single_letter_subdomain() {
        let host = CloudClient::host_for_token("some-test-token");
        assert!(host.ends_with(".cloud.xdebug.com"));
        let letter = host.chars().next().unwrap_or('?');
        assert!(('a'..='p').contains(&letter), "letter {letter} out of range");
    }

    #[test]
    fn host_for_token_is_deterministic() {
        let a = CloudClient::host_for_token("abc123");
        let b = CloudClient::host_for_token("abc123");
        assert_eq!(a, b);
    }

    #[test]
    fn parses_successful_proxyinit_reply() {
        let xml = br#"<proxyinit xmlns="urn:debugger_protocol_v1" success="1" idekey="test" address="127.0.0.1" port="9000"/>"#;
        let reply = must(parse_registration_reply(xml));
        assert!(reply.success);
        assert_eq!(reply.error_message, None);
    }

    #[test]
    fn parses_failed_proxyinit_reply_with_message() {
        let xml = br#"<proxyinit xmlns="urn:debugger_protocol_v1" success="0"><error id="2"><message>IDE key already registered</message></error></proxyinit>"#;
        let reply = must(parse_registration_reply(xml));
        assert!(!reply.success);
        assert_eq!(reply.error_message.as_deref(), Some("IDE key already registered"));
    }

    #[tokio::test]
    async fn proxy_client_round_trips_against_a_mock_listener() {
        let listener = must(TcpListener::bind("127.0.0.1:0").await);
        let addr = must(listener.local_addr());

        let server = tokio::spawn(async move {
            let (mut socket, _) = must(listener.accept().await);
            let mut command = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                must(socket.read_exact(&mut byte).await);
                if byte[0] == 0 {
                    break;
                }
                command.push(byte[0]);
            }
            assert_eq!(String::from_utf8_lossy(&command), "proxyinit -k my-key -p 9000 -m 0");
            let reply = br#"<proxyinit xmlns="urn:debugger_protocol_v1" success="1"/>"#;
            must(socket.write_all(&dbgp_frame::encode_frame(reply)).await);
        });

        let mut client = must(ProxyClient::connect(&addr.ip().to_string(), addr.port()).await);
        let reply = must(client.init("my-key", 9000, false).await);
        assert!(reply.success);

        must(server.await);
    }
}
