//! Agent ↔ collector streaming protocol
//!
//! Every frame sent by an agent is a JSON [`Envelope`]. The first frame of a
//! connection is a handshake without `data`; the collector answers every
//! frame with exactly one bare [`Reply`] string.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Sample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T = Sample> {
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn handshake(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            data: None,
        }
    }

    pub fn payload(secret: impl Into<String>, data: T) -> Self {
        Self {
            secret: secret.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Authenticated,
    AuthenticationFailed,
    Ack,
    InvalidSecret,
    InvalidJson,
    Error,
}

impl Reply {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reply::Authenticated => "authenticated",
            Reply::AuthenticationFailed => "authentication_failed",
            Reply::Ack => "ack",
            Reply::InvalidSecret => "invalid_secret",
            Reply::InvalidJson => "invalid_json",
            Reply::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Reply> {
        let reply = match raw.trim() {
            "authenticated" => Reply::Authenticated,
            "authentication_failed" => Reply::AuthenticationFailed,
            "ack" => Reply::Ack,
            "invalid_secret" => Reply::InvalidSecret,
            "invalid_json" => Reply::InvalidJson,
            "error" => Reply::Error,
            _ => return None,
        };
        Some(reply)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
