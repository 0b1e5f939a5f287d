//! Attribute type codes for indexed attributes.

use serde::{Deserialize, Serialize};

/// Type of the attribute an index is declared over.
///
/// The code is persisted in the index meta page and checked on reopen.
/// Only [`AttrType::Integer`] is handled by the tree algorithms; the other
/// codes exist so that a file declared over them is recognized (and
/// rejected) rather than misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AttrType {
    /// 32-bit signed integer.
    Integer = 0,
    /// 64-bit IEEE double.
    Double = 1,
    /// Fixed-length character string.
    String = 2,
}

impl AttrType {
    /// Returns the on-disk code for this type.
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Decodes an on-disk type code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(AttrType::Integer),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::String),
            _ => None,
        }
    }

    /// Returns the fixed byte size of a key of this type.
    pub fn key_size(&self) -> usize {
        match self {
            AttrType::Integer => 4,
            AttrType::Double => 8,
            AttrType::String => 10,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Integer => "INTEGER",
            AttrType::Double => "DOUBLE",
            AttrType::String => "STRING",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AttrType::Integer.code(), 0);
        assert_eq!(AttrType::Double.code(), 1);
        assert_eq!(AttrType::String.code(), 2);
    }

    #[test]
    fn test_code_roundtrip() {
        for ty in [AttrType::Integer, AttrType::Double, AttrType::String] {
            assert_eq!(AttrType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(AttrType::from_code(3), None);
        assert_eq!(AttrType::from_code(u32::MAX), None);
    }

    #[test]
    fn test_key_sizes() {
        assert_eq!(AttrType::Integer.key_size(), 4);
        assert_eq!(AttrType::Double.key_size(), 8);
    }

    #[test]
    fn test_display() {
        assert_eq!(AttrType::Integer.to_string(), "INTEGER");
        assert_eq!(AttrType::Double.to_string(), "DOUBLE");
        assert_eq!(AttrType::String.to_string(), "STRING");
    }

    #[test]
    fn test_serde_roundtrip() {
        let serialized = serde_json::to_string(&AttrType::Integer).unwrap();
        let deserialized: AttrType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, AttrType::Integer);
    }
}
