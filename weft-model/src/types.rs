//! Strong types for identifiers
//!
//! Semantic newtypes replacing raw byte arrays and integers.

use std::fmt;

/// 32-byte content identifier (BLAKE3 digest of an envelope's canonical bytes).
///
/// Byte equality is identity: two envelopes with the same cid are the same
/// envelope. Displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct Cid(#[serde(with = "serde_bytes")] pub [u8; 32]);

impl Cid {
    pub const ZERO: Cid = Cid([0u8; 32]);

    /// Returns the inner bytes as a slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Parse from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {}", e))?;
        Self::try_from(bytes).map_err(|v| format!("expected 32 bytes, got {}", v.len()))
    }
}

impl From<[u8; 32]> for Cid {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<blake3::Hash> for Cid {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl AsRef<[u8]> for Cid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Cid {
    type Error = std::array::TryFromSliceError;
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(<[u8; 32]>::try_from(slice)?))
    }
}

impl TryFrom<Vec<u8>> for Cid {
    type Error = Vec<u8>;
    fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
        if vec.len() != 32 {
            return Err(vec);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&vec);
        Ok(Self(arr))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::LowerHex for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid(")?;
        fmt::Display::fmt(self, f)?;
        write!(f, ")")
    }
}

/// Opaque peer identity within a mesh.
///
/// Assigned by the transport; the core never interprets it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_display() {
        let cid = Cid([0xab; 32]);
        let expected = "ab".repeat(32);
        assert_eq!(format!("{}", cid), expected);
        assert_eq!(format!("{:?}", cid), format!("Cid({})", expected));
    }

    #[test]
    fn test_cid_from_hex_roundtrip() {
        let cid = Cid([0x5c; 32]);
        let parsed = Cid::from_hex(&format!("{}", cid)).unwrap();
        assert_eq!(parsed, cid);
    }

    #[test]
    fn test_cid_from_hex_rejects_bad_input() {
        assert!(Cid::from_hex("zz").is_err());
        assert!(Cid::from_hex("abcd").is_err());
    }

    #[test]
    fn test_cid_slice_conversions() {
        let bytes = [7u8; 32];
        let cid = Cid::try_from(&bytes[..]).unwrap();
        assert_eq!(cid.as_bytes(), &bytes);
        assert!(Cid::try_from(&bytes[..16]).is_err());
        assert!(Cid::try_from(vec![1u8; 31]).is_err());
    }
}
