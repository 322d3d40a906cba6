//! Content-addressed envelopes
//!
//! An `Envelope` is the immutable unit of replication: a payload published to
//! a topic, linked to its causal parents. The cid is a BLAKE3 digest of the
//! canonical (prost) serialization and is derived at construction, so the
//! same content always yields the same envelope.

use crate::proto::storage as proto;
use crate::types::Cid;
use prost::Message;
use thiserror::Error;

/// Errors raised while constructing or validating an envelope.
///
/// All of these are caller errors: they surface unchanged and are never
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("envelope topic {actual:?} does not match {expected:?}")]
    TopicMismatch { expected: String, actual: String },

    #[error("cid mismatch: carried {carried}, derived {derived}")]
    CidMismatch { carried: Cid, derived: Cid },

    #[error("invalid parent cid length: expected 32 bytes, got {0}")]
    InvalidParentLength(usize),

    #[error("wire decode error: {0}")]
    Decode(String),
}

/// An immutable, content-addressed event on a topic.
///
/// Parents are the heads of the publisher's replica at publish time; they are
/// stored sorted and deduplicated so the canonical encoding does not depend
/// on head-set iteration order.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    topic: String,
    parents: Vec<Cid>,
    timestamp_ns: u64,
    payload: Vec<u8>,
    cid: Cid,
}

impl Envelope {
    /// Build an envelope, deriving its cid.
    pub fn new(
        topic: impl Into<String>,
        mut parents: Vec<Cid>,
        timestamp_ns: u64,
        payload: Vec<u8>,
    ) -> Result<Self, EnvelopeError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(EnvelopeError::EmptyTopic);
        }
        parents.sort_unstable();
        parents.dedup();

        let cid = derive_cid(&topic, &parents, timestamp_ns, &payload);
        Ok(Self {
            topic,
            parents,
            timestamp_ns,
            payload,
            cid,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn parents(&self) -> &[Cid] {
        &self.parents
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    /// Check this envelope against a replica's expectations.
    ///
    /// `expected_topic` is the topic of the store about to ingest it; `None`
    /// skips the topic check (e.g. when routing by the envelope's own topic).
    pub fn validate(&self, expected_topic: Option<&str>) -> Result<(), EnvelopeError> {
        if self.topic.is_empty() {
            return Err(EnvelopeError::EmptyTopic);
        }
        if let Some(expected) = expected_topic {
            if self.topic != expected {
                return Err(EnvelopeError::TopicMismatch {
                    expected: expected.to_string(),
                    actual: self.topic.clone(),
                });
            }
        }
        let derived = derive_cid(&self.topic, &self.parents, self.timestamp_ns, &self.payload);
        if derived != self.cid {
            return Err(EnvelopeError::CidMismatch {
                carried: self.cid,
                derived,
            });
        }
        Ok(())
    }

    /// Canonical serialization; input to the cid derivation.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(&self.topic, &self.parents, self.timestamp_ns, &self.payload)
    }

    /// Encode for the wire. The cid is not carried; receivers re-derive it.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.canonical_bytes()
    }

    /// Decode from the wire, deriving the cid from the received fields.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire = proto::Envelope::decode(bytes)
            .map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        Self::try_from(wire)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("topic", &self.topic)
            .field("cid", &self.cid)
            .field("parents", &self.parents.len())
            .field("timestamp_ns", &self.timestamp_ns)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl From<&Envelope> for proto::Envelope {
    fn from(env: &Envelope) -> Self {
        proto::Envelope {
            content_topic: env.topic.clone(),
            timestamp_ns: env.timestamp_ns,
            payload: env.payload.clone(),
            parent_cids: env.parents.iter().map(|c| c.to_vec()).collect(),
        }
    }
}

impl TryFrom<proto::Envelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(wire: proto::Envelope) -> Result<Self, Self::Error> {
        let parents = wire
            .parent_cids
            .into_iter()
            .map(|raw| {
                let len = raw.len();
                Cid::try_from(raw).map_err(|_| EnvelopeError::InvalidParentLength(len))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Envelope::new(wire.content_topic, parents, wire.timestamp_ns, wire.payload)
    }
}

fn canonical_bytes(topic: &str, parents: &[Cid], timestamp_ns: u64, payload: &[u8]) -> Vec<u8> {
    let wire = proto::Envelope {
        content_topic: topic.to_string(),
        timestamp_ns,
        payload: payload.to_vec(),
        parent_cids: parents.iter().map(|c| c.to_vec()).collect(),
    };
    wire.encode_to_vec()
}

fn derive_cid(topic: &str, parents: &[Cid], timestamp_ns: u64, payload: &[u8]) -> Cid {
    Cid::from(blake3::hash(&canonical_bytes(
        topic,
        parents,
        timestamp_ns,
        payload,
    )))
}
