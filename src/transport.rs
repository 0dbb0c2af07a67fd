use crate::error::AgentError;
use anyhow::Context;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const OUTBOUND_QUEUE_CAP: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BASE_MS: u64 = 1000;
const RECONNECT_CAP_MS: u64 = 60_000;

/// The outer envelope exchanged over the wire, `{type, payload, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(rename = "type")]
    pub type_: String,
    pub payload: Value,
    pub timestamp: i64,
}

/// Inbound control messages the registry/agent must act on.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    SetBreakpoint {
        id: String,
        file_path: String,
        line_number: i64,
        condition: Option<String>,
        max_hits: u32,
    },
    RemoveBreakpoint {
        id: String,
    },
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// Full-duplex connection to the collector: masked-frame outbound path,
/// non-blocking inbound reads, bounded queue while unauthenticated, and
/// exponential-backoff reconnection with auth-failure latching.
pub struct Transport {
    backend_url: String,
    api_key: String,
    environment: String,
    application_name: Option<String>,
    agent_id: String,
    hostname: String,

    stream: Option<Stream>,
    connected: bool,
    authenticated: bool,
    latched: bool,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,

    queue: VecDeque<Vec<u8>>,
    inbound_buf: Vec<u8>,
}

impl Transport {
    pub fn new(backend_url: &str, api_key: &str, environment: &str, application_name: Option<String>, agent_id: String, max_reconnect_attempts: u32) -> Self {
        Self {
            backend_url: backend_url.to_string(),
            api_key: api_key.to_string(),
            environment: environment.to_string(),
            application_name,
            agent_id,
            hostname: hostname(),
            stream: None,
            connected: false,
            authenticated: false,
            latched: false,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            queue: VecDeque::new(),
            inbound_buf: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.latched
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The agent id the collector assigned in its last `registered` reply,
    /// or the id this transport was constructed with if it hasn't
    /// reconnected yet. The collector may rename it on registration, so
    /// outbound payloads must read it here rather than cache it elsewhere.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Delay before the next reconnect attempt, given the attempts made so
    /// far: `min(1000 * 2^(n-1), 60_000) ms`.
    pub fn next_reconnect_delay(&self) -> Duration {
        reconnect_delay(self.reconnect_attempts + 1)
    }

    /// Opens the socket, negotiates TLS when the URL scheme calls for it,
    /// performs the HTTP-upgrade handshake, and sends the `register`
    /// envelope. Does not block waiting for `registered`; that arrives via
    /// [`Transport::process_messages`].
    pub fn connect(&mut self) -> Result<(), AgentError> {
        if self.latched {
            return Err(AgentError::TransportAuth {
                code: "latched".to_string(),
                message: "reconnection disabled after prior auth failure".to_string(),
            });
        }

        let (host, port, path, secure) = parse_target(&self.backend_url).map_err(|e| AgentError::TransportHandshake { reason: format!("{e:#}") })?;

        let tcp = TcpStream::connect_timeout(
            &format!("{host}:{port}")
                .to_socket_addrs_first()
                .map_err(|e| AgentError::TransportConnect { source: e })?,
            CONNECT_TIMEOUT,
        )
        .map_err(|e| AgentError::TransportConnect { source: e })?;

        let mut stream = if secure {
            let connector = native_tls::TlsConnector::new().map_err(|e| AgentError::TransportHandshake { reason: e.to_string() })?;
            let tls = connector.connect(&host, tcp).map_err(|e| AgentError::TransportHandshake { reason: e.to_string() })?;
            Stream::Tls(Box::new(tls))
        } else {
            Stream::Plain(tcp)
        };

        let mut key_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let sec_key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {sec_key}\r\nSec-WebSocket-Version: 13\r\nAuthorization: Bearer {api_key}\r\n\r\n",
            api_key = self.api_key,
        );
        stream.write_all(request.as_bytes()).map_err(|e| AgentError::TransportWrite { source: e })?;

        let mut response = [0u8; 1024];
        let n = stream.read(&mut response).map_err(|e| AgentError::TransportRead { source: e })?;
        let response_text = String::from_utf8_lossy(&response[..n]);
        if !response_text.contains(" 101 ") {
            return Err(AgentError::TransportHandshake { reason: format!("unexpected handshake response: {response_text}") });
        }

        match &stream {
            Stream::Plain(tcp) => {
                tcp.set_nonblocking(true).ok();
            }
            Stream::Tls(tls) => {
                tls.get_ref().set_nonblocking(true).ok();
            }
        }

        self.stream = Some(stream);
        self.connected = true;
        self.authenticated = false;
        self.reconnect_attempts = 0;

        let register_payload = serde_json::json!({
            "api_key": self.api_key,
            "agent_id": self.agent_id,
            "hostname": self.hostname,
            "environment": self.environment,
            "runtime": "rust",
            "runtime_version": option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
            "agent_version": env!("CARGO_PKG_VERSION"),
            "application_name": self.application_name,
        });
        self.write_envelope("register", register_payload)?;
        Ok(())
    }

    fn write_envelope(&mut self, type_: &str, payload: Value) -> Result<(), AgentError> {
        let envelope = MessageEnvelope { type_: type_.to_string(), payload, timestamp: now_ms() };
        let json = serde_json::to_vec(&envelope).map_err(|e| AgentError::Serialize { source: e })?;
        let frame = encode_frame(&json);
        if let Some(stream) = &mut self.stream {
            write_all_best_effort(stream, &frame)?;
        }
        Ok(())
    }

    /// Enqueues or writes an outbound message depending on auth state.
    /// Stamps the mandatory identity fields the collector keys records on:
    /// `agent_id` on every payload, plus `environment`/`hostname` on
    /// `exception` payloads specifically.
    pub fn send(&mut self, type_: &str, payload: Value) -> Result<(), AgentError> {
        let payload = self.stamp_identity(type_, payload);
        let envelope = MessageEnvelope { type_: type_.to_string(), payload, timestamp: now_ms() };
        let json = serde_json::to_vec(&envelope).map_err(|e| AgentError::Serialize { source: e })?;

        if self.authenticated {
            let frame = encode_frame(&json);
            if let Some(stream) = &mut self.stream {
                write_all_best_effort(stream, &frame)?;
                return Ok(());
            }
        }
        if self.queue.len() >= OUTBOUND_QUEUE_CAP {
            self.queue.pop_front();
        }
        self.queue.push_back(json);
        Ok(())
    }

    fn stamp_identity(&self, type_: &str, mut payload: Value) -> Value {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("agent_id".to_string(), Value::String(self.agent_id.clone()));
            if type_ == "exception" {
                obj.insert("environment".to_string(), Value::String(self.environment.clone()));
                obj.insert("hostname".to_string(), Value::String(self.hostname.clone()));
            }
        }
        payload
    }

    fn flush_queue(&mut self) -> Result<(), AgentError> {
        while let Some(json) = self.queue.pop_front() {
            let frame = encode_frame(&json);
            if let Some(stream) = &mut self.stream {
                write_all_best_effort(stream, &frame)?;
            }
        }
        Ok(())
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Non-blocking read of whatever is available; decodes at most one
    /// complete frame per call and returns any control events it implies.
    /// Partial frames are retried on the next call.
    pub fn process_messages(&mut self) -> Result<Vec<InboundEvent>, AgentError> {
        let Some(stream) = &mut self.stream else { return Ok(Vec::new()) };

        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk) {
            Ok(0) => {
                self.connected = false;
            }
            Ok(n) => self.inbound_buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(AgentError::TransportRead { source: e }),
        }

        let mut events = Vec::new();
        if let Some((payload, consumed)) = decode_frame(&self.inbound_buf) {
            self.inbound_buf.drain(..consumed);
            if let Ok(envelope) = serde_json::from_slice::<MessageEnvelope>(&payload) {
                self.handle_envelope(envelope, &mut events)?;
            }
        }
        Ok(events)
    }

    fn handle_envelope(&mut self, envelope: MessageEnvelope, events: &mut Vec<InboundEvent>) -> Result<(), AgentError> {
        match envelope.type_.as_str() {
            "registered" => {
                if let Some(id) = envelope.payload.get("agent_id").and_then(Value::as_str) {
                    self.agent_id = id.to_string();
                }
                self.authenticated = true;
                self.flush_queue()?;
            }
            "error" => {
                let code = envelope.payload.get("code").and_then(Value::as_str).unwrap_or("").to_string();
                if code == "auth_error" || code == "invalid_api_key" {
                    self.latched = true;
                    self.max_reconnect_attempts = 0;
                    self.disconnect();
                }
            }
            "set_breakpoint" => {
                let payload = &envelope.payload;
                let id = payload.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let file_path = payload
                    .get("file_path")
                    .or_else(|| payload.get("file"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let line_number = payload
                    .get("line_number")
                    .or_else(|| payload.get("line"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let condition = payload.get("condition").and_then(Value::as_str).map(str::to_string);
                let max_hits = payload.get("max_hits").and_then(Value::as_u64).unwrap_or(1) as u32;
                events.push(InboundEvent::SetBreakpoint { id, file_path, line_number, condition, max_hits });
            }
            "remove_breakpoint" => {
                let id = envelope.payload.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                events.push(InboundEvent::RemoveBreakpoint { id });
            }
            _ => {}
        }
        Ok(())
    }

    pub fn record_reconnect_attempt(&mut self) {
        self.reconnect_attempts += 1;
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
        self.connected = false;
        self.authenticated = false;
    }
}

/// Resolves the `(host, port, path, secure)` tuple from a backend URL,
/// chaining context the way the rest of this crate's internal plumbing
/// does before the caller converts the failure into an `AgentError` at the
/// public boundary.
fn parse_target(backend_url: &str) -> anyhow::Result<(String, u16, String, bool)> {
    let url = url::Url::parse(backend_url).with_context(|| format!("parsing backend url '{backend_url}'"))?;
    let host = url.host_str().context("backend url has no host")?.to_string();
    let secure = matches!(url.scheme(), "wss" | "https");
    let port = url.port().unwrap_or(if secure { 443 } else { 80 });
    let path = if url.path().is_empty() { "/".to_string() } else { url.path().to_string() };
    Ok((host, port, path, secure))
}

fn reconnect_delay(attempt: u32) -> Duration {
    let ms = RECONNECT_BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
    Duration::from_millis(ms.min(RECONNECT_CAP_MS))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

fn write_all_best_effort(stream: &mut Stream, mut buf: &[u8]) -> Result<(), AgentError> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => break,
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(AgentError::TransportWrite { source: e }),
        }
    }
    Ok(())
}

/// Encodes a client-to-server masked text frame: FIN+opcode byte, masked
/// length indicator, optional extended length, 4-byte mask key, then the
/// XOR-masked payload.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x81);

    let len = payload.len();
    if len <= 125 {
        frame.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mut mask_key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask_key);
    frame.extend_from_slice(&mask_key);

    for (i, byte) in payload.iter().enumerate() {
        frame.push(byte ^ mask_key[i % 4]);
    }
    frame
}

/// Decodes one frame (masked or unmasked) from the front of `buf`, returning
/// the unmasked payload and the number of bytes consumed. Returns `None`
/// when `buf` does not yet contain a complete frame.
pub fn decode_frame(buf: &[u8]) -> Option<(Vec<u8>, usize)> {
    if buf.len() < 2 {
        return None;
    }
    let masked = buf[1] & 0x80 != 0;
    let len_indicator = buf[1] & 0x7f;

    let (payload_len, mut offset) = match len_indicator {
        126 => {
            if buf.len() < 4 {
                return None;
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        127 => {
            if buf.len() < 10 {
                return None;
            }
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(arr) as usize, 10)
        }
        n => (n as usize, 2),
    };

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return None;
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + payload_len {
        return None;
    }

    let mut payload = buf[offset..offset + payload_len].to_vec();
    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }
    Some((payload, offset + payload_len))
}

trait ResolveAddr {
    fn to_socket_addrs_first(&self) -> std::io::Result<std::net::SocketAddr>;
}

impl ResolveAddr for String {
    fn to_socket_addrs_first(&self) -> std::io::Result<std::net::SocketAddr> {
        use std::net::ToSocketAddrs;
        self.to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_small_payload() {
        let payload = b"hello world";
        let frame = encode_frame(payload);
        let (decoded, consumed) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn frame_round_trips_126_length_path() {
        let payload = vec![7u8; 200];
        let frame = encode_frame(&payload);
        assert_eq!(frame[1] & 0x7f, 126);
        let (decoded, _) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn frame_round_trips_127_length_path() {
        let payload = vec![3u8; 70_000];
        let frame = encode_frame(&payload);
        assert_eq!(frame[1] & 0x7f, 127);
        let (decoded, _) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn partial_frame_returns_none() {
        let frame = encode_frame(b"hello");
        assert!(decode_frame(&frame[..frame.len() - 1]).is_none());
    }

    #[test]
    fn unmasked_frame_decodes() {
        let mut frame = vec![0x81, 5];
        frame.extend_from_slice(b"hello");
        let (decoded, consumed) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, b"hello");
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn reconnect_delay_follows_exponential_schedule() {
        assert_eq!(reconnect_delay(1), Duration::from_millis(1000));
        assert_eq!(reconnect_delay(2), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(3), Duration::from_millis(4000));
        assert_eq!(reconnect_delay(20), Duration::from_millis(60_000));
    }

    fn test_transport() -> Transport {
        Transport::new("wss://example.invalid", "key", "prod", None, "agent-1".to_string(), 5)
    }

    #[test]
    fn stamp_identity_adds_agent_id_to_every_type() {
        let t = test_transport();
        let stamped = t.stamp_identity("breakpoint_hit", serde_json::json!({"breakpoint_id": "x"}));
        assert_eq!(stamped["agent_id"], "agent-1");
        assert!(stamped.get("environment").is_none());
    }

    #[test]
    fn stamp_identity_adds_environment_and_hostname_for_exception() {
        let t = test_transport();
        let stamped = t.stamp_identity("exception", serde_json::json!({"message": "boom"}));
        assert_eq!(stamped["agent_id"], "agent-1");
        assert_eq!(stamped["environment"], "prod");
        assert!(stamped["hostname"].is_string());
    }

    #[test]
    fn agent_id_getter_reflects_registered_rename() {
        let mut t = test_transport();
        let mut events = Vec::new();
        let envelope = MessageEnvelope {
            type_: "registered".to_string(),
            payload: serde_json::json!({"agent_id": "agent-2"}),
            timestamp: 0,
        };
        t.handle_envelope(envelope, &mut events).unwrap();
        assert_eq!(t.agent_id(), "agent-2");
    }

    #[test]
    fn auth_error_latches_and_disconnects() {
        let mut t = test_transport();
        t.authenticated = true;
        let mut events = Vec::new();
        let envelope = MessageEnvelope {
            type_: "error".to_string(),
            payload: serde_json::json!({"code": "invalid_api_key"}),
            timestamp: 0,
        };
        t.handle_envelope(envelope, &mut events).unwrap();
        assert!(t.is_latched());
        assert!(!t.is_connected());
        assert!(!t.is_authenticated());
        assert_eq!(t.max_reconnect_attempts(), 0);
    }
}
