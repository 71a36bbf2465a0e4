//! Scheduling protocol: the tagged messages exchanged between the controller
//! and its workers.
//!
//! ```text
//! worker                      controller
//!   | ---- READY -----------------> |  claim_next()
//!   | <--- START(task) / EXIT ----- |
//!   | ---- DONE(result) ----------> |  save_result()
//!   | ---- EXIT ------------------> |  exited += 1
//! ```
//!
//! Tags travel as raw integers so that a tag outside the alphabet can be
//! received and reported instead of being unrepresentable.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::domain::Rank;
use crate::error::ProtocolError;

/// Message tags. Values match the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Tag {
    /// worker -> controller: "I have capacity".
    Ready = 1,
    /// worker -> controller: carries a `TaskResult`.
    Done = 2,
    /// controller -> worker: terminate. worker -> controller: terminated.
    Exit = 3,
    /// controller -> worker: carries a `Task`.
    Start = 4,
}

impl Tag {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Tag {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Tag::Ready),
            2 => Ok(Tag::Done),
            3 => Ok(Tag::Exit),
            4 => Ok(Tag::Start),
            other => Err(other),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Ready => "READY",
            Tag::Done => "DONE",
            Tag::Exit => "EXIT",
            Tag::Start => "START",
        };
        f.write_str(name)
    }
}

/// Which side of the protocol observed a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Controller,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Controller => f.write_str("controller"),
            Role::Worker => f.write_str("worker"),
        }
    }
}

/// A message as delivered by the fabric: source, raw tag and JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: Rank,
    pub tag: i32,
    pub payload: Value,
}

impl Envelope {
    pub fn new(source: Rank, tag: i32, payload: Value) -> Self {
        Self {
            source,
            tag,
            payload,
        }
    }

    /// Decode the tag, reporting codes outside the alphabet as a violation.
    pub fn tag(&self, role: Role) -> Result<Tag, ProtocolError> {
        Tag::try_from(self.tag).map_err(|tag| ProtocolError::UnknownTag {
            role,
            tag,
            from: self.source,
        })
    }

    /// Decode the payload of a message already known to carry `tag`.
    pub fn decode<T: DeserializeOwned>(self, tag: Tag) -> Result<T, ProtocolError> {
        let from = self.source;
        serde_json::from_value(self.payload)
            .map_err(|error| ProtocolError::Payload { tag, from, error })
    }
}

/// Encode a payload for `tag`.
pub fn encode<T: Serialize>(tag: Tag, value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|error| ProtocolError::Encode { tag, error })
}
