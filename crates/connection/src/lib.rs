//! # Transport
//!
//! A `Connection` sends and receives whole [`Packet`]s over a framed,
//! blocking, single-threaded stream. Framing wraps each serialized packet
//! (or the bare function id sent by [`Connection::start_func_call`]) in a
//! 4-byte big-endian length prefix so `recv_packet` knows exactly how many
//! bytes to read before attempting to parse them.
//!
//! [`TcpConnection`] is the real implementation (`std::net::TcpStream`,
//! optionally wrapped in `native_tls::TlsStream`). [`MockConnection`] is an
//! in-memory stand-in used by `urfa-interpreter` and `urfa-client` tests.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use native_tls::TlsConnector;
use tracing::{debug, instrument};
use urfa_common::UrfaError;
use urfa_packet::Packet;

/// Authentication role presented during [`Connection::login`], mirroring the
/// upstream library's three login kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginType {
    User,
    System,
    Card,
}

impl LoginType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Some(LoginType::User),
            "system" => Some(LoginType::System),
            "card" => Some(LoginType::Card),
            _ => None,
        }
    }

    fn wire_code(self) -> i32 {
        match self {
            LoginType::User => 0,
            LoginType::System => 1,
            LoginType::Card => 2,
        }
    }
}

/// A connection to the RPC server: blocking send/recv of framed packets plus
/// the function-call and login handshakes.
pub trait Connection {
    /// Performs the login handshake. Called once, right after `connect`.
    fn login(&mut self, login: &str, pass: &str, login_type: LoginType) -> Result<(), UrfaError>;

    /// Announces the function about to be called, before any request
    /// attribute packets are sent.
    fn start_func_call(&mut self, function_id: i32) -> Result<(), UrfaError>;

    /// Sends one framed packet.
    fn send_packet(&mut self, packet: &Packet) -> Result<(), UrfaError>;

    /// Blocks until one framed packet has been read and parsed.
    fn recv_packet(&mut self) -> Result<Packet, UrfaError>;
}

fn write_frame(w: &mut impl Write, bytes: &[u8]) -> Result<(), UrfaError> {
    w.write_all(&(bytes.len() as u32).to_be_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_frame(r: &mut impl Read) -> Result<Vec<u8>, UrfaError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

enum Stream {
    Plain(TcpStream),
    Tls(native_tls::TlsStream<TcpStream>),
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

/// A real connection: `std::net::TcpStream`, optionally wrapped in
/// `native_tls::TlsStream` when the caller asks for `ssl`.
pub struct TcpConnection {
    stream: Stream,
}

impl TcpConnection {
    /// Opens a TCP connection to `host_port` (`host` or `host:port`,
    /// defaulting to port 11758), applying `timeout` to both the connect
    /// attempt and subsequent reads/writes, and wrapping the stream in TLS
    /// when `ssl` is true.
    #[instrument(skip_all, fields(host_port, ssl))]
    pub fn connect(host_port: &str, ssl: bool, timeout: Duration) -> Result<Self, UrfaError> {
        let addr = normalize_host_port(host_port);
        let tcp = TcpStream::connect(&addr).map_err(|e| UrfaError::system(format!("connect to {addr} failed: {e}")))?;
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;

        let stream = if ssl {
            let connector = TlsConnector::new().map_err(|e| UrfaError::other(format!("tls setup failed: {e}")))?;
            let host = addr.split(':').next().unwrap_or(&addr).to_string();
            let tls = connector
                .connect(&host, tcp)
                .map_err(|e| UrfaError::other(format!("tls handshake failed: {e}")))?;
            Stream::Tls(tls)
        } else {
            Stream::Plain(tcp)
        };

        debug!("connected");
        Ok(Self { stream })
    }
}

fn normalize_host_port(host_port: &str) -> String {
    if host_port.contains(':') {
        host_port.to_string()
    } else {
        format!("{host_port}:11758")
    }
}

impl Connection for TcpConnection {
    #[instrument(skip_all)]
    fn login(&mut self, login: &str, pass: &str, login_type: LoginType) -> Result<(), UrfaError> {
        let mut packet = Packet::new();
        packet.push_int(login_type.wire_code());
        packet.push_string(login);
        packet.push_string(pass);
        write_frame(&mut self.stream, &packet.serialize())?;
        let _ack = read_frame(&mut self.stream)?;
        Ok(())
    }

    fn start_func_call(&mut self, function_id: i32) -> Result<(), UrfaError> {
        write_frame(&mut self.stream, &function_id.to_be_bytes())
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), UrfaError> {
        write_frame(&mut self.stream, &packet.serialize())
    }

    fn recv_packet(&mut self) -> Result<Packet, UrfaError> {
        let bytes = read_frame(&mut self.stream)?;
        Packet::parse(&bytes)
    }
}

/// An in-memory `Connection` for tests: `recv_packet` pops from a
/// pre-loaded queue; everything sent is recorded for assertions.
#[derive(Debug, Default)]
pub struct MockConnection {
    pub inbound: std::collections::VecDeque<Packet>,
    pub sent_packets: Vec<Packet>,
    pub started_calls: Vec<i32>,
    pub logins: Vec<(String, String, LoginType)>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbound(packets: Vec<Packet>) -> Self {
        Self {
            inbound: packets.into(),
            ..Default::default()
        }
    }
}

impl Connection for MockConnection {
    fn login(&mut self, login: &str, pass: &str, login_type: LoginType) -> Result<(), UrfaError> {
        self.logins.push((login.to_string(), pass.to_string(), login_type));
        Ok(())
    }

    fn start_func_call(&mut self, function_id: i32) -> Result<(), UrfaError> {
        self.started_calls.push(function_id);
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), UrfaError> {
        self.sent_packets.push(packet.clone());
        Ok(())
    }

    fn recv_packet(&mut self) -> Result<Packet, UrfaError> {
        self.inbound
            .pop_front()
            .ok_or_else(|| UrfaError::other("mock connection exhausted: no more inbound packets"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_connection_replays_queued_packets_in_order() {
        let mut p1 = Packet::new();
        p1.push_int(1);
        let mut p2 = Packet::new();
        p2.push_termination();

        let mut conn = MockConnection::with_inbound(vec![p1.clone(), p2.clone()]);
        assert_eq!(conn.recv_packet().unwrap(), p1);
        assert_eq!(conn.recv_packet().unwrap(), p2);
        assert!(conn.recv_packet().is_err());
    }

    #[test]
    fn mock_connection_records_sent_packets_and_calls() {
        let mut conn = MockConnection::new();
        conn.start_func_call(42).unwrap();
        let mut out = Packet::new();
        out.push_string("hi");
        conn.send_packet(&out).unwrap();

        assert_eq!(conn.started_calls, vec![42]);
        assert_eq!(conn.sent_packets, vec![out]);
    }

    #[test]
    fn normalize_host_port_adds_default_port() {
        assert_eq!(normalize_host_port("localhost"), "localhost:11758");
        assert_eq!(normalize_host_port("localhost:9999"), "localhost:9999");
    }

    #[test]
    fn login_type_parses_known_names_case_insensitively() {
        assert_eq!(LoginType::parse("User"), Some(LoginType::User));
        assert_eq!(LoginType::parse("SYSTEM"), Some(LoginType::System));
        assert_eq!(LoginType::parse("card"), Some(LoginType::Card));
        assert_eq!(LoginType::parse("nope"), None);
    }
}
