//! QLab replies and request errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::OscArg;

/// The JSON body QLab sends back on `/reply/...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn parse(address: &str, json: &str) -> Result<Self, ReplyError> {
        serde_json::from_str(json).map_err(|e| ReplyError::Decode {
            address: address.to_string(),
            message: format!("{}: {}", e, json),
        })
    }

    /// Parse the first string argument of a reply message.
    pub fn from_args(address: &str, args: &[OscArg]) -> Result<Self, ReplyError> {
        let json = args
            .first()
            .and_then(OscArg::as_str)
            .ok_or_else(|| ReplyError::Decode {
                address: address.to_string(),
                message: "reply carried no JSON string argument".to_string(),
            })?;
        Self::parse(address, json)
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    pub fn data_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Structured failure of a request. Callers branch on the kind to pick a
/// fallback, so timeouts are never folded into other variants.
#[derive(Debug, Clone, Error)]
pub enum ReplyError {
    #[error(
        "timeout waiting for reply from QLab for {address} after {attempts} attempt(s); \
         large workspaces may need a longer timeout or more retries"
    )]
    Timeout { address: String, attempts: u32 },

    #[error("QLab returned an error for {address}:\n{body}")]
    Status { address: String, body: String },

    #[error("malformed reply for {address}: {message}")]
    Decode { address: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("OSC client has shut down")]
    Shutdown,
}

impl ReplyError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReplyError::Timeout { .. })
    }
}

pub type ReplyResult = Result<Reply, ReplyError>;
