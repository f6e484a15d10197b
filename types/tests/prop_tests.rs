use proptest::prelude::*;

use chainwire_types::{Lifecycle, ObjectId, PeerAddress, ServiceState};

proptest! {
    /// Display -> FromStr reproduces the same IPv4 address.
    #[test]
    fn peer_address_display_parse_roundtrip(a in 0u8..=255, b in 0u8..=255, port in 1u16..) {
        let addr = PeerAddress::new(format!("10.{a}.{b}.1"), port);
        let parsed: PeerAddress = addr.to_string().parse().unwrap();
        prop_assert_eq!(parsed, addr);
    }

    /// Object ids built from hashes are stable and distinct per hash.
    #[test]
    fn object_id_from_hash_injective(
        x in prop::array::uniform32(0u8..),
        y in prop::array::uniform32(0u8..),
    ) {
        prop_assert_eq!(ObjectId::from_hash(&x) == ObjectId::from_hash(&y), x == y);
    }

    /// Repeated start calls on a running service never leave RUNNING.
    #[test]
    fn repeated_start_keeps_running(n in 1usize..10) {
        let mut lc = Lifecycle::new();
        lc.begin_start().unwrap();
        lc.mark_running().unwrap();
        for _ in 0..n {
            prop_assert!(!lc.begin_start().unwrap());
        }
        prop_assert_eq!(lc.state(), ServiceState::Running);
    }
}
