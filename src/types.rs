use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// IMAP unique message identifier, valid within one UIDVALIDITY epoch.
pub type Uid = u32;

bitflags! {
    /// Per-message flag state the device tracks across sync cycles.
    ///
    /// Only the read and flagged bits participate in change detection;
    /// everything else the server reports is ignored at this layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MessageFlags: u8 {
        const SEEN = 0b01;
        const FLAGGED = 0b10;
    }
}

impl MessageFlags {
    pub fn is_seen(&self) -> bool {
        self.contains(MessageFlags::SEEN)
    }

    pub fn is_flagged(&self) -> bool {
        self.contains(MessageFlags::FLAGGED)
    }
}

/// Collection type of a synchronized folder, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionClass {
    Email,
    Contacts,
    Calendar,
    Tasks,
    Notes,
    /// The recipient-information pseudo-folder (ranked recipient cache).
    RecipientCache,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_bits() {
        let flags = MessageFlags::SEEN | MessageFlags::FLAGGED;
        assert!(flags.is_seen());
        assert!(flags.is_flagged());
        assert!(!MessageFlags::empty().is_seen());
    }

    #[test]
    fn test_collection_class_serde_roundtrip() {
        let json = serde_json::to_string(&CollectionClass::RecipientCache).unwrap();
        assert_eq!(json, "\"recipient_cache\"");
        let back: CollectionClass = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CollectionClass::RecipientCache);
    }
}
