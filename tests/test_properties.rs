//! Property-based invariants for the client list and registry.

use proptest::prelude::*;

use mds::client_list::ClientList;
use mds::{ClientId, Registry};

#[derive(Debug, Clone)]
enum Op {
    Add(u64),
    Remove(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..8).prop_map(Op::Add),
        (0u64..8).prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn multiplicity_matches_adds_minus_removes(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut list = ClientList::new();
        let mut expected: i64 = 0;

        for op in &ops {
            match op {
                Op::Add(v) if *v == 7 => {
                    list.add(*v).unwrap();
                    expected += 1;
                }
                Op::Remove(v) if *v == 7 => {
                    if expected > 0 {
                        list.remove(*v);
                        expected -= 1;
                    }
                }
                _ => {}
            }
        }

        let actual = list.iter().filter(|&c| c == 7).count() as i64;
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn capacity_is_always_a_power_of_two_and_at_least_size(adds in 0usize..64) {
        let mut list = ClientList::new();
        for i in 0..adds {
            list.add(i as u64).unwrap();
        }
        prop_assert!(list.capacity().is_power_of_two());
        prop_assert!(list.len() <= list.capacity());
    }

    #[test]
    fn shrink_never_drops_below_default_or_violates_half_occupancy(adds in 1usize..64) {
        let mut list = ClientList::new();
        for i in 0..adds {
            list.add(i as u64).unwrap();
        }
        for i in 0..adds {
            list.remove(i as u64);
        }
        prop_assert!(list.capacity() == 8 || list.len() * 2 > list.capacity());
    }
}

#[test]
fn command_absent_once_multiplicity_reaches_zero() {
    let registry = Registry::new();
    let client = ClientId::new(9, 9);
    registry.add("focus", client);
    registry.remove("focus", client);
    assert_eq!(registry.list(), "");
}

#[test]
fn close_then_add_is_not_idempotent() {
    let registry = Registry::new();
    let client = ClientId::new(2, 2);
    registry.add("focus", client);
    registry.remove_client_everywhere(client);
    registry.add("focus", client);
    assert_eq!(registry.list(), "focus");
}
