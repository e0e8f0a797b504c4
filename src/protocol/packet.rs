//! Framed packet codec.
//!
//! Every message on the coupling subworld is one length-delimited UTF-8 JSON
//! object whose `type` key selects the schema. The closed kind set is
//! register / ack / deregister / request / waiting / response; anything else,
//! or a missing required field, decodes to [`LinkError::MalformedPacket`].
//! Extra keys are ignored so controllers written against newer schemas stay
//! interoperable.

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::protocol::atom::{AtomData, FixData};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    /// Worker announces itself to a prospective controller.
    Register {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<u64>,
    },
    /// Controller accepts a registration, optionally assigning an identifier.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<u64>,
    },
    /// Worker leaves the coupling for good.
    Deregister {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<u64>,
    },
    /// One batch of atom state, answered by exactly one `Response`.
    Request {
        /// Response budget the worker will enforce, in milliseconds.
        #[serde(rename = "expectResponse")]
        expect_response: f64,
        atoms: Vec<AtomData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<u64>,
    },
    /// Backpressure token: request seen, response deferred, do not time out.
    Waiting,
    /// Force deltas, positionally matched to the request atoms.
    Response {
        atoms: Vec<FixData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<u64>,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, LinkError> {
        serde_json::to_vec(self).map_err(|err| LinkError::MalformedPacket(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LinkError> {
        serde_json::from_slice(bytes).map_err(|err| LinkError::MalformedPacket(err.to_string()))
    }

    /// Wire name of the packet kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Register { .. } => "register",
            Packet::Ack { .. } => "ack",
            Packet::Deregister { .. } => "deregister",
            Packet::Request { .. } => "request",
            Packet::Waiting => "waiting",
            Packet::Response { .. } => "response",
        }
    }
}
