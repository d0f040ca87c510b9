//! # Call Orchestrator & Client Context
//!
//! [`UrfaClient`] is the single entry point applications use: it owns the
//! configuration, the (optional) open connection, and the loaded schema, and
//! exposes one operation of consequence — [`UrfaClient::call`] — that drives
//! a function call end to end: build the request packet, send it, pump
//! packets through a [`ResponseInterpreter`] until the terminator, and hand
//! back the accumulated result hash.

pub mod config;

pub use config::{Config, LoginTypeConfig};

use std::io::Write;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use urfa_common::{ErrorSink, NullSink, UrfaError};
use urfa_connection::{Connection, TcpConnection};
use urfa_hash::ParamHash;
use urfa_interpreter::{build_request, FeedOutcome, ResponseInterpreter};
use urfa_packet::AttrKind;
use urfa_schema::FunctionTable;

/// Records `err`'s message on the context's error slot and returns it
/// unchanged, as a free function over the field directly (rather than a
/// `&mut self` method) so it can be called while another field of
/// [`UrfaClient`] is already mutably borrowed.
fn note_error(last_error: &mut Option<String>, err: UrfaError) -> UrfaError {
    *last_error = Some(err.message.clone());
    err
}

/// A client context: configuration, an optional open connection, and an
/// optional loaded schema. Mirrors the upstream library's `ourfa_t`.
pub struct UrfaClient {
    config: Config,
    connection: Option<Box<dyn Connection>>,
    schema: Option<FunctionTable>,
    /// The last error's formatted message, retrievable after any failing
    /// call — mirrors the C library's fixed-size per-context error buffer.
    last_error: Option<String>,
    /// Caller-supplied write-only sink for human-readable request/response
    /// dumps. `None` unless [`UrfaClient::set_debug_stream`] was called.
    debug_stream: Option<Box<dyn Write + Send>>,
    error_sink: Box<dyn ErrorSink + Send>,
}

impl Default for UrfaClient {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl UrfaClient {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connection: None,
            schema: None,
            last_error: None,
            debug_stream: None,
            error_sink: Box::new(NullSink),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// The last error's formatted message, valid until the next call that
    /// mutates this context.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Installs a sink that receives a copy of every diagnostic the schema
    /// loader and call engine report, alongside (not instead of) their
    /// `tracing` events.
    pub fn set_error_sink(&mut self, sink: Box<dyn ErrorSink + Send>) {
        self.error_sink = sink;
    }

    /// Installs a write-only sink that receives human-readable dumps of the
    /// input hash, outgoing packet, incoming packets, and final result hash
    /// for every subsequent call.
    pub fn set_debug_stream(&mut self, stream: Box<dyn Write + Send>) {
        self.debug_stream = Some(stream);
    }

    fn record_error(&mut self, err: UrfaError) -> UrfaError {
        note_error(&mut self.last_error, err)
    }

    /// Loads a schema from `path` (or [`urfa_schema::DEFAULT_API_XML_PATH`]
    /// if `None`, or `config.api_xml_file` if set and `path` is `None`).
    /// One-shot: fails if this context already has a schema loaded.
    pub fn load_schema(&mut self, path: Option<&std::path::Path>) -> Result<(), UrfaError> {
        if self.schema.is_some() {
            return Err(self.record_error(UrfaError::other(
                "a schema is already loaded into this context; loading a second one is not supported",
            )));
        }
        let owned_path;
        let resolved = match path {
            Some(p) => Some(p),
            None => match &self.config.api_xml_file {
                Some(p) => {
                    owned_path = std::path::PathBuf::from(p);
                    Some(owned_path.as_path())
                }
                None => None,
            },
        };
        let table = urfa_schema::load_file(resolved, self.error_sink.as_ref())
            .map_err(|e| self.record_error(e))?;
        self.schema = Some(table);
        Ok(())
    }

    pub fn schema(&self) -> Option<&FunctionTable> {
        self.schema.as_ref()
    }

    /// Opens the connection and performs the login handshake. Configuration
    /// changes are rejected for as long as the connection stays open.
    #[instrument(skip_all)]
    pub fn connect(&mut self) -> Result<(), UrfaError> {
        if self.connection.is_some() {
            return Err(self.record_error(UrfaError::other("already connected")));
        }
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut conn = TcpConnection::connect(&self.config.server_port, self.config.ssl, timeout)
            .map_err(|e| self.record_error(e))?;
        conn.login(&self.config.login, &self.config.pass, self.config.login_type.into())
            .map_err(|e| self.record_error(e))?;
        self.connection = Some(Box::new(conn));
        Ok(())
    }

    /// Installs an already-connected (or mock) [`Connection`] directly,
    /// bypassing `connect()`'s TCP/TLS/login handshake — used by tests and by
    /// callers who manage their own transport.
    pub fn attach_connection(&mut self, connection: Box<dyn Connection>) {
        self.connection = Some(connection);
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    /// Executes one RPC call end to end (§4.5 of the design):
    ///
    /// 1. Reject if no schema or no connection.
    /// 2. Resolve `function_name` (case-insensitive); fail if absent.
    /// 3. If `in` has children, build and send the request packet plus
    ///    terminator.
    /// 4. `start_func_call(function.id)`.
    /// 5. Create a [`ResponseInterpreter`] for the function.
    /// 6. Receive packets, feeding each to the interpreter, until one
    ///    carries a `Termination` attribute.
    /// 7. Finalize; an interpreter still mid-walk at that point is logged,
    ///    not treated as an error (upstream's ambiguous-but-preserved
    ///    behavior — see Design Note).
    /// 8. Return the result hash.
    #[instrument(skip_all, fields(function = %function_name))]
    pub fn call(&mut self, function_name: &str, input: &ParamHash) -> Result<ParamHash, UrfaError> {
        if self.schema.is_none() {
            return Err(self.record_error(UrfaError::other("XML api not loaded")));
        }
        if self.connection.is_none() {
            return Err(self.record_error(UrfaError::other("not connected")));
        }

        // Clone the looked-up function so nothing below needs to hold a
        // borrow of `self.schema` across the mutable borrows of
        // `self.connection` / `self.debug_stream` the rest of this method
        // takes.
        let function = match self.schema.as_ref().unwrap().get(function_name) {
            Some(f) => f.clone(),
            None => {
                return Err(self.record_error(UrfaError::other(format!(
                    "unknown function '{function_name}'"
                ))))
            }
        };

        if let Some(stream) = self.debug_stream.as_mut() {
            let _ = input.dump(stream, &format!("--- input hash for '{function_name}' ---"));
        }

        let connection = self.connection.as_mut().expect("checked above");

        if function.input.has_children(function.input.root()) {
            let mut packet = build_request(&function.input, input).map_err(|e| {
                warn!(error = %e, "request interpreter failed");
                note_error(&mut self.last_error, e)
            })?;
            packet.push_termination();
            if let Some(stream) = self.debug_stream.as_mut() {
                let _ = packet.dump(stream, "--- outgoing packet ---");
            }
            connection
                .start_func_call(function.id)
                .map_err(|e| note_error(&mut self.last_error, e))?;
            connection
                .send_packet(&packet)
                .map_err(|e| note_error(&mut self.last_error, e))?;
        } else {
            connection
                .start_func_call(function.id)
                .map_err(|e| note_error(&mut self.last_error, e))?;
        }

        let mut interpreter = ResponseInterpreter::start(self.schema.as_ref().unwrap(), &function.name)
            .map_err(|e| note_error(&mut self.last_error, e))?;
        let connection = self.connection.as_mut().expect("checked above");
        loop {
            let packet = connection
                .recv_packet()
                .map_err(|e| note_error(&mut self.last_error, e))?;
            if let Some(stream) = self.debug_stream.as_mut() {
                let _ = packet.dump(stream, "--- incoming packet ---");
            }
            let terminated = packet.first_of_kind(AttrKind::Termination).is_some();
            match interpreter.feed(&packet) {
                Ok(FeedOutcome::Done) => break,
                Ok(FeedOutcome::NeedMore) => {
                    if terminated {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(note_error(&mut self.last_error, e)),
            }
        }

        if !interpreter.is_finished() {
            debug!("response interpreter still needed more data when terminator arrived; returning partial result");
        }
        let result = interpreter
            .end()
            .map_err(|e| note_error(&mut self.last_error, e))?;

        if let Some(stream) = self.debug_stream.as_mut() {
            let _ = result.dump(stream, "--- result hash ---");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use urfa_common::Value;
    use urfa_connection::MockConnection;
    use urfa_packet::Packet;

    fn client_with_schema(xml: &str) -> UrfaClient {
        let mut client = UrfaClient::default();
        let tmp = std::env::temp_dir().join(format!("urfa-test-{}.xml", std::process::id()));
        std::fs::write(&tmp, xml).unwrap();
        client.load_schema(Some(&tmp)).unwrap();
        std::fs::remove_file(&tmp).ok();
        client
    }

    #[test]
    fn call_rejects_without_schema() {
        let mut client = UrfaClient::default();
        client.attach_connection(Box::new(MockConnection::new()));
        let err = client.call("ping", &ParamHash::new()).unwrap_err();
        assert_eq!(err.message, "XML api not loaded");
    }

    #[test]
    fn call_rejects_without_connection() {
        let mut client = client_with_schema(r#"<urfa><function name="ping" id="1"/></urfa>"#);
        let err = client.call("ping", &ParamHash::new()).unwrap_err();
        assert_eq!(err.message, "not connected");
    }

    #[test]
    fn s1_ping_with_only_terminator_returns_empty_hash() {
        let mut client = client_with_schema(r#"<urfa><function name="ping" id="1"/></urfa>"#);
        let mut term_only = Packet::new();
        term_only.push_termination();
        client.attach_connection(Box::new(MockConnection::with_inbound(vec![term_only])));

        let result = client.call("ping", &ParamHash::new()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn s2_scalar_input_sends_exactly_one_attribute_plus_terminator() {
        let mut client = client_with_schema(
            r#"<urfa><function name="setx" id="7"><input><integer name="x"/></input></function></urfa>"#,
        );
        let mut term = Packet::new();
        term.push_termination();
        let mock = MockConnection::with_inbound(vec![term]);
        client.attach_connection(Box::new(mock));

        let mut input = ParamHash::new();
        input.set("x", 0, Value::Int(42));
        client.call("setx", &input).unwrap();
    }

    #[test]
    fn s3_for_loop_output_accumulates_into_result() {
        let mut client = client_with_schema(
            r#"<urfa><function name="f" id="1"><output>
                <integer name="cnt"/>
                <for name="i" from="0" count="cnt"><integer name="v" array_index="i"/></for>
            </output></function></urfa>"#,
        );
        let mut pkt = Packet::new();
        pkt.push_int(3);
        pkt.push_int(10);
        pkt.push_int(20);
        pkt.push_int(30);
        pkt.push_termination();
        client.attach_connection(Box::new(MockConnection::with_inbound(vec![pkt])));

        let result = client.call("f", &ParamHash::new()).unwrap();
        assert_eq!(result.get("cnt", 0), Some(&Value::Long(3)));
        assert_eq!(result.get("v", 1), Some(&Value::Int(20)));
    }

    #[test]
    fn s8_no_input_children_skips_request_transmission() {
        use std::sync::{Arc, Mutex};

        struct SharedMock(Arc<Mutex<MockConnection>>);
        impl Connection for SharedMock {
            fn login(&mut self, login: &str, pass: &str, login_type: urfa_connection::LoginType) -> Result<(), UrfaError> {
                self.0.lock().unwrap().login(login, pass, login_type)
            }
            fn start_func_call(&mut self, function_id: i32) -> Result<(), UrfaError> {
                self.0.lock().unwrap().start_func_call(function_id)
            }
            fn send_packet(&mut self, packet: &Packet) -> Result<(), UrfaError> {
                self.0.lock().unwrap().send_packet(packet)
            }
            fn recv_packet(&mut self) -> Result<Packet, UrfaError> {
                self.0.lock().unwrap().recv_packet()
            }
        }

        let mut client = client_with_schema(r#"<urfa><function name="ping" id="1"/></urfa>"#);
        let mut term = Packet::new();
        term.push_termination();
        let shared = Arc::new(Mutex::new(MockConnection::with_inbound(vec![term])));
        client.attach_connection(Box::new(SharedMock(shared.clone())));
        client.call("ping", &ParamHash::new()).unwrap();

        assert!(shared.lock().unwrap().sent_packets.is_empty());
        assert_eq!(shared.lock().unwrap().started_calls, vec![1]);
    }

    #[test]
    fn unknown_function_fails() {
        let mut client = client_with_schema(r#"<urfa><function name="ping" id="1"/></urfa>"#);
        client.attach_connection(Box::new(MockConnection::new()));
        assert!(client.call("missing", &ParamHash::new()).is_err());
    }

    #[test]
    fn second_schema_load_is_rejected() {
        let mut client = client_with_schema(r#"<urfa><function name="ping" id="1"/></urfa>"#);
        let tmp = std::env::temp_dir().join(format!("urfa-test2-{}.xml", std::process::id()));
        std::fs::write(&tmp, r#"<urfa><function name="pong" id="2"/></urfa>"#).unwrap();
        let err = client.load_schema(Some(&tmp)).unwrap_err();
        std::fs::remove_file(&tmp).ok();
        assert!(err.message.contains("already loaded"));
    }

    #[test]
    fn config_mutation_rejected_while_connected() {
        let mut client = UrfaClient::default();
        client.attach_connection(Box::new(MockConnection::new()));
        let mut config = client.config().clone();
        assert!(config.set_login("bob", client.is_connected()).is_err());
    }
}
