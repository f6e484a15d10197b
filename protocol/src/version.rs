//! Protocol version management.

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 70016;

/// Minimum supported protocol version.
pub const MIN_PROTOCOL_VERSION: u32 = 70001;

/// Check if a peer's protocol version is compatible.
pub fn is_compatible(peer_version: u32) -> bool {
    (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&peer_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_window() {
        assert!(is_compatible(PROTOCOL_VERSION));
        assert!(is_compatible(MIN_PROTOCOL_VERSION));
        assert!(!is_compatible(MIN_PROTOCOL_VERSION - 1));
        assert!(!is_compatible(PROTOCOL_VERSION + 1));
    }
}
