//! # Wire Packet Codec
//!
//! A packet is an ordered list of typed, length-prefixed attributes. This
//! crate knows how to assemble an outgoing list from typed values and how to
//! disassemble an inbound byte slice back into one. It has no opinion about
//! how those bytes reach the wire — that is `urfa-connection`'s job, which
//! frames a whole serialized packet with its own outer length prefix before
//! handing bytes to a socket.
//!
//! Integers are big-endian on the wire, matching the network byte order the
//! original C implementation produces via `htonl`/`htons`.

use std::net::Ipv4Addr;
use urfa_common::{UrfaError, Value};

/// The wire tag identifying an attribute's value type, or the `Termination`
/// sentinel that marks end-of-stream for one call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Integer,
    Long,
    Double,
    String,
    IpAddress,
    Termination,
}

impl AttrKind {
    fn wire_tag(self) -> u8 {
        match self {
            AttrKind::Integer => 1,
            AttrKind::Long => 2,
            AttrKind::Double => 3,
            AttrKind::String => 4,
            AttrKind::IpAddress => 5,
            AttrKind::Termination => 6,
        }
    }

    fn from_wire_tag(tag: u8) -> Result<Self, UrfaError> {
        Ok(match tag {
            1 => AttrKind::Integer,
            2 => AttrKind::Long,
            3 => AttrKind::Double,
            4 => AttrKind::String,
            5 => AttrKind::IpAddress,
            6 => AttrKind::Termination,
            other => return Err(UrfaError::other(format!("unknown attribute tag {other}"))),
        })
    }
}

/// One decoded wire attribute: a kind tag plus its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub kind: AttrKind,
    pub bytes: Vec<u8>,
}

impl Attribute {
    /// Decodes the payload as the [`Value`] matching `self.kind`.
    pub fn as_value(&self) -> Result<Value, UrfaError> {
        match self.kind {
            AttrKind::Integer => {
                let arr: [u8; 4] = self
                    .bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| UrfaError::other("integer attribute has wrong length"))?;
                Ok(Value::Int(i32::from_be_bytes(arr)))
            }
            AttrKind::Long => {
                let arr: [u8; 8] = self
                    .bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| UrfaError::other("long attribute has wrong length"))?;
                Ok(Value::Long(i64::from_be_bytes(arr)))
            }
            AttrKind::Double => {
                let arr: [u8; 8] = self
                    .bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| UrfaError::other("double attribute has wrong length"))?;
                Ok(Value::Double(f64::from_bits(u64::from_be_bytes(arr))))
            }
            AttrKind::String => {
                let s = String::from_utf8(self.bytes.clone())
                    .map_err(|e| UrfaError::other(format!("invalid utf-8 in string attribute: {e}")))?;
                Ok(Value::Str(s))
            }
            AttrKind::IpAddress => {
                let arr: [u8; 4] = self
                    .bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| UrfaError::other("ip attribute has wrong length"))?;
                Ok(Value::Ip(Ipv4Addr::from(arr)))
            }
            AttrKind::Termination => Ok(Value::Int(4)),
        }
    }
}

/// An outgoing or parsed-incoming ordered list of attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    attrs: Vec<Attribute>,
}

impl Packet {
    pub fn new() -> Self {
        Self { attrs: Vec::new() }
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn push_int(&mut self, v: i32) {
        self.attrs.push(Attribute {
            kind: AttrKind::Integer,
            bytes: v.to_be_bytes().to_vec(),
        });
    }

    pub fn push_long(&mut self, v: i64) {
        self.attrs.push(Attribute {
            kind: AttrKind::Long,
            bytes: v.to_be_bytes().to_vec(),
        });
    }

    pub fn push_double(&mut self, v: f64) {
        self.attrs.push(Attribute {
            kind: AttrKind::Double,
            bytes: v.to_bits().to_be_bytes().to_vec(),
        });
    }

    pub fn push_string(&mut self, v: &str) {
        self.attrs.push(Attribute {
            kind: AttrKind::String,
            bytes: v.as_bytes().to_vec(),
        });
    }

    pub fn push_ip(&mut self, v: Ipv4Addr) {
        self.attrs.push(Attribute {
            kind: AttrKind::IpAddress,
            bytes: v.octets().to_vec(),
        });
    }

    /// Appends the terminator attribute (kind `Termination`, integer payload
    /// `4`), marking end-of-stream for this call direction.
    pub fn push_termination(&mut self) {
        self.attrs.push(Attribute {
            kind: AttrKind::Termination,
            bytes: 4i32.to_be_bytes().to_vec(),
        });
    }

    pub fn push_value(&mut self, value: &Value) {
        match value {
            Value::Int(v) => self.push_int(*v),
            Value::Long(v) => self.push_long(*v),
            Value::Double(v) => self.push_double(*v),
            Value::Str(v) => self.push_string(v),
            Value::Ip(v) => self.push_ip(*v),
        }
    }

    /// Returns the first attribute of the given kind, if any — used to test
    /// for the `Termination` sentinel without consuming the packet.
    pub fn first_of_kind(&self, kind: AttrKind) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.kind == kind)
    }

    /// Serializes to wire bytes: each attribute as `[tag: u8][len: u32 BE][bytes]`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for attr in &self.attrs {
            out.push(attr.kind.wire_tag());
            out.extend_from_slice(&(attr.bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&attr.bytes);
        }
        out
    }

    /// Parses a byte slice containing zero or more consecutive encoded
    /// attributes (as produced by [`Packet::serialize`]) into a `Packet`.
    pub fn parse(mut bytes: &[u8]) -> Result<Self, UrfaError> {
        let mut attrs = Vec::new();
        while !bytes.is_empty() {
            if bytes.len() < 5 {
                return Err(UrfaError::other("truncated attribute header"));
            }
            let tag = bytes[0];
            let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
            bytes = &bytes[5..];
            if bytes.len() < len {
                return Err(UrfaError::other("truncated attribute payload"));
            }
            let (payload, rest) = bytes.split_at(len);
            attrs.push(Attribute {
                kind: AttrKind::from_wire_tag(tag)?,
                bytes: payload.to_vec(),
            });
            bytes = rest;
        }
        Ok(Packet { attrs })
    }

    /// Human-readable dump, used by the call orchestrator's debug stream.
    pub fn dump(&self, out: &mut impl std::io::Write, header: &str) -> std::io::Result<()> {
        writeln!(out, "{header}")?;
        for attr in &self.attrs {
            match attr.as_value() {
                Ok(v) => writeln!(out, "  {:?}: {v}", attr.kind)?,
                Err(e) => writeln!(out, "  {:?}: <undecodable: {e}>", attr.kind)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_then_parse_round_trips_all_types() {
        let mut pkt = Packet::new();
        pkt.push_int(42);
        pkt.push_long(-9_000_000_000);
        pkt.push_double(3.5);
        pkt.push_string("hello");
        pkt.push_ip(Ipv4Addr::new(10, 0, 0, 1));
        pkt.push_termination();

        let bytes = pkt.serialize();
        let parsed = Packet::parse(&bytes).unwrap();

        assert_eq!(parsed.attrs().len(), 6);
        assert_eq!(parsed.attrs()[0].as_value().unwrap(), Value::Int(42));
        assert_eq!(parsed.attrs()[1].as_value().unwrap(), Value::Long(-9_000_000_000));
        assert_eq!(parsed.attrs()[2].as_value().unwrap(), Value::Double(3.5));
        assert_eq!(parsed.attrs()[3].as_value().unwrap(), Value::Str("hello".into()));
        assert_eq!(
            parsed.attrs()[4].as_value().unwrap(),
            Value::Ip(Ipv4Addr::new(10, 0, 0, 1))
        );
    }

    #[test]
    fn first_of_kind_finds_termination() {
        let mut pkt = Packet::new();
        pkt.push_int(1);
        assert!(pkt.first_of_kind(AttrKind::Termination).is_none());
        pkt.push_termination();
        assert!(pkt.first_of_kind(AttrKind::Termination).is_some());
    }

    #[test]
    fn parse_rejects_truncated_payload() {
        let mut pkt = Packet::new();
        pkt.push_string("hello world");
        let mut bytes = pkt.serialize();
        bytes.truncate(bytes.len() - 2);
        assert!(Packet::parse(&bytes).is_err());
    }

    #[test]
    fn empty_packet_serializes_to_empty_bytes() {
        let pkt = Packet::new();
        assert!(pkt.serialize().is_empty());
        assert_eq!(Packet::parse(&[]).unwrap(), Packet::new());
    }
}
