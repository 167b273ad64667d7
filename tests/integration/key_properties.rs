#![forbid(unsafe_code)]

use proptest::prelude::*;
use sombra_counts::primitives::tree::Layout;
use sombra_counts::storage::counts::{CountsKey, CountsKeyKind, CountsLayout};
use sombra_counts::types::{GroupId, LabelId, RelationshipDirection, TxId, TypeId};
use std::cmp::Ordering;

fn arb_direction() -> impl Strategy<Value = RelationshipDirection> {
    prop_oneof![
        Just(RelationshipDirection::Outgoing),
        Just(RelationshipDirection::Incoming),
        Just(RelationshipDirection::Loop),
    ]
}

fn arb_kind() -> impl Strategy<Value = CountsKeyKind> {
    prop_oneof![
        any::<u32>().prop_map(|label| CountsKeyKind::Node {
            label: LabelId(label)
        }),
        (any::<u32>(), any::<u32>(), any::<u32>()).prop_map(|(start, ty, end)| {
            CountsKeyKind::Relationship {
                start: LabelId(start),
                ty: TypeId(ty),
                end: LabelId(end),
            }
        }),
        (0u64..(1 << 62), arb_direction()).prop_map(|(group, direction)| {
            CountsKeyKind::Degree {
                group: GroupId(group),
                direction,
            }
        }),
        any::<u64>().prop_map(|tx| CountsKeyKind::StrayTxId { tx: TxId(tx) }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn byte_order_matches_key_order(a in arb_kind(), b in arb_kind()) {
        let (a, b) = (CountsKey::from(a), CountsKey::from(b));
        let by_bytes = a.to_bytes().cmp(&b.to_bytes());
        prop_assert_eq!(by_bytes, a.cmp(&b));
        let layout = CountsLayout;
        prop_assert_eq!(layout.compare(&a, &b), by_bytes);
    }

    #[test]
    fn typed_view_survives_encoding(kind in arb_kind()) {
        let key = CountsKey::from(kind);
        let decoded = CountsKey::decode(&key.to_bytes()).unwrap();
        prop_assert_eq!(decoded, key);
        prop_assert_eq!(decoded.kind(), Some(kind));
    }

    #[test]
    fn counts_sort_after_stray_markers(kind in arb_kind(), tx in any::<u64>()) {
        let key = CountsKey::from(kind);
        let marker = CountsKey::stray_tx_id(TxId(tx));
        if key.is_count() {
            prop_assert_eq!(marker.cmp(&key), Ordering::Less);
            prop_assert!(key >= CountsKey::MIN_COUNT);
        } else {
            prop_assert!(key <= CountsKey::MAX_STRAY_TX_ID);
        }
    }
}
