//! Cluster membership entities
//!
//! A `Node` is one row of the authoritative membership registry. The raw
//! signing key and address are kept as supplied; `is_valid_config` is derived
//! once at construction and participates in equality, so a node whose config
//! flips between valid and invalid shows up as a change.

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use thiserror::Error;

/// Error from the roster source.
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster fetch failed: {0}")]
    Fetch(String),

    #[error("roster fetch timed out")]
    Timeout,
}

/// One member of the cluster as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: u16,
    /// Raw signing key bytes as reported; may fail to parse.
    pub signing_key: Vec<u8>,
    pub http_address: String,
    pub is_healthy: bool,
    /// Derived: the signing key parses as ed25519 AND the address carries an
    /// http/https scheme. Consumers treat invalid-config nodes as unhealthy.
    pub is_valid_config: bool,
}

impl Node {
    /// Build a node from raw registry values, deriving `is_valid_config`.
    ///
    /// A malformed entry is retained (not rejected) so it keeps appearing in
    /// the roster; the invalid bit is how consumers learn to avoid it.
    pub fn new(
        node_id: u16,
        signing_key: impl Into<Vec<u8>>,
        http_address: impl Into<String>,
        is_healthy: bool,
    ) -> Self {
        let signing_key = signing_key.into();
        let http_address = http_address.into();

        let key_ok = VerifyingKey::try_from(signing_key.as_slice()).is_ok();
        let address_ok =
            http_address.starts_with("https://") || http_address.starts_with("http://");

        Self {
            node_id,
            signing_key,
            http_address,
            is_healthy,
            is_valid_config: key_ok && address_ok,
        }
    }

    /// Healthy and well-configured.
    pub fn is_usable(&self) -> bool {
        self.is_healthy && self.is_valid_config
    }
}

/// Read-only snapshot source for the membership roster.
///
/// Must be idempotent: two calls with an unchanged registry return equal
/// rosters.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_roster(&self) -> Result<Vec<Node>, RosterError>;
}
