use std::collections::HashMap;

use proptest::prelude::*;
use vhwa_overlay::handle_table::HandleTable;

const CAPACITY: u32 = 16;

#[derive(Clone, Debug)]
enum Op {
    Put(u16),
    MapPut(u32, u16),
    Remove(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u16>().prop_map(Op::Put),
        (0..CAPACITY + 2, any::<u16>()).prop_map(|(h, v)| Op::MapPut(h, v)),
        (0..CAPACITY + 2).prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn table_matches_a_map_model(ops in proptest::collection::vec(op(), 0..200)) {
        let mut table = HandleTable::new(CAPACITY);
        let mut model: HashMap<u32, u16> = HashMap::new();

        for op in ops {
            match op {
                Op::Put(v) => match table.put(v) {
                    Some(h) => {
                        prop_assert!(h != 0 && h < CAPACITY);
                        prop_assert!(model.insert(h, v).is_none(), "handle {} handed out twice", h);
                    }
                    None => prop_assert_eq!(model.len(), CAPACITY as usize - 1),
                },
                Op::MapPut(h, v) => {
                    let expected = h != 0 && h < CAPACITY && !model.contains_key(&h);
                    prop_assert_eq!(table.map_put(h, v), expected);
                    if expected {
                        model.insert(h, v);
                    }
                }
                Op::Remove(h) => prop_assert_eq!(table.remove(h), model.remove(&h)),
            }
            prop_assert_eq!(table.usage(), model.len());
            prop_assert!(table.usage() < table.capacity());
        }

        for h in 0..CAPACITY + 2 {
            prop_assert_eq!(table.get(h), model.get(&h).copied());
        }
    }
}
