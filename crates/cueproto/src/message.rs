//! OSC message model.

use rosc::{OscPacket, OscType};

use crate::reply::ReplyError;

/// The argument types QLab sends and accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Str(String),
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl OscArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }

    fn from_osc(value: OscType) -> Option<Self> {
        match value {
            OscType::String(s) => Some(OscArg::Str(s)),
            OscType::Int(i) => Some(OscArg::Int(i)),
            OscType::Float(f) => Some(OscArg::Float(f)),
            OscType::Bool(b) => Some(OscArg::Bool(b)),
            OscType::Long(l) => Some(match i32::try_from(l) {
                Ok(i) => OscArg::Int(i),
                Err(_) => OscArg::Str(l.to_string()),
            }),
            OscType::Double(d) => Some(OscArg::Float(d as f32)),
            _ => None,
        }
    }

    fn into_osc(self) -> OscType {
        match self {
            OscArg::Str(s) => OscType::String(s),
            OscArg::Int(i) => OscType::Int(i),
            OscArg::Float(f) => OscType::Float(f),
            OscArg::Bool(b) => OscType::Bool(b),
        }
    }
}

impl From<&str> for OscArg {
    fn from(value: &str) -> Self {
        OscArg::Str(value.to_string())
    }
}

impl From<String> for OscArg {
    fn from(value: String) -> Self {
        OscArg::Str(value)
    }
}

impl From<i32> for OscArg {
    fn from(value: i32) -> Self {
        OscArg::Int(value)
    }
}

impl From<f32> for OscArg {
    fn from(value: f32) -> Self {
        OscArg::Float(value)
    }
}

impl From<bool> for OscArg {
    fn from(value: bool) -> Self {
        OscArg::Bool(value)
    }
}

impl std::fmt::Display for OscArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OscArg::Str(s) => write!(f, ",s {}", s),
            OscArg::Int(i) => write!(f, ",i {}", i),
            OscArg::Float(v) => write!(f, ",f {}", v),
            OscArg::Bool(b) => write!(f, ",{}", if *b { "T" } else { "F" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// A query or command carrying at most one string. QLab treats an empty
    /// string argument differently from no argument, so empty input is dropped.
    pub fn with_input(address: impl Into<String>, input: &str) -> Self {
        let mut msg = Self::new(address);
        if !input.is_empty() {
            msg.args.push(OscArg::from(input));
        }
        msg
    }

    pub fn first_str(&self) -> Option<&str> {
        self.args.first().and_then(OscArg::as_str)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ReplyError> {
        let packet = OscPacket::Message(rosc::OscMessage {
            addr: self.address.clone(),
            args: self.args.iter().cloned().map(OscArg::into_osc).collect(),
        });
        rosc::encoder::encode(&packet)
            .map_err(|e| ReplyError::Transport(format!("failed to encode {}: {:?}", self.address, e)))
    }

    /// Decode one datagram. Bundles are flattened in order.
    pub fn decode(bytes: &[u8]) -> Result<Vec<OscMessage>, ReplyError> {
        let (_rest, packet) = rosc::decoder::decode_udp(bytes)
            .map_err(|e| ReplyError::Transport(format!("undecodable OSC packet: {:?}", e)))?;
        let mut out = Vec::new();
        flatten(packet, &mut out);
        Ok(out)
    }
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(OscMessage {
            address: msg.addr,
            args: msg.args.into_iter().filter_map(OscArg::from_osc).collect(),
        }),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

impl std::fmt::Display for OscMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
