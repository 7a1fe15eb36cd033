use proptest::prelude::*;
use queuesim_distribute::{CompositeTree, TreeParams};

proptest! {
    #[test]
    fn leaf_count_is_branching_power(branching in 1u32..6, depth in 1u32..6) {
        let mut tree = CompositeTree::new();
        tree.build(TreeParams::new(10, branching, depth), &[]).unwrap();
        prop_assert_eq!(tree.leaves().len() as u64, u64::from(branching).pow(depth - 1));
    }

    #[test]
    fn rounding_error_is_bounded_by_leaf_count(
        total in 1u64..10_000,
        branching in 1u32..5,
        depth in 1u32..5,
    ) {
        let params = TreeParams::new(total, branching, depth);
        let leaves = params.leaf_count().unwrap();
        let mut tree = CompositeTree::new();
        tree.build(params, &[]).unwrap();

        let scheduled = tree.scheduled();
        prop_assert_eq!(Some(scheduled), params.scheduled());
        prop_assert!(scheduled.abs_diff(total) <= leaves - 1);
    }

    #[test]
    fn leaf_ranges_tile_the_scheduled_indices(
        total in 1u64..500,
        branching in 1u32..4,
        depth in 1u32..4,
    ) {
        let mut tree = CompositeTree::new();
        tree.build(TreeParams::new(total, branching, depth), &[]).unwrap();
        let mut next = 0;
        for id in tree.leaves() {
            let slot = tree.get(id).unwrap().compute().unwrap();
            prop_assert_eq!(slot.first_index, next);
            next += slot.replications;
        }
        prop_assert_eq!(next, tree.scheduled());
    }
}
