use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Status value a worker writes once it is serving
pub const READY_STATUS: &str = "ready";

/// The one-line handshake record a worker prints on stdout
///
/// Only `status` and `port` carry meaning. They are kept as raw JSON so any
/// object parses, whatever the field types, and anything else the worker adds
/// is kept in `extra` so error reports show the record as it was received.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ReadySignal {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub status: Value,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub port: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReadySignal {
    /// The bound port, if this record announces a ready worker
    ///
    /// A port that is missing, not an integer or outside `u16` disqualifies
    /// the record just like a wrong status.
    pub fn ready_port(&self) -> Option<u16> {
        if self.status.as_str() != Some(READY_STATUS) {
            return None;
        }
        self.port.as_u64().and_then(|port| u16::try_from(port).ok())
    }
}

impl fmt::Display for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// Observable state of a started worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Ready,
    Stopped,
}
