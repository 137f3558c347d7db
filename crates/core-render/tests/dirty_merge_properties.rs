//! Property tests for dirty region merging.

use core_render::dirty::{DirtyRegionSet, MAX_REGIONS, MERGE_GAP};
use proptest::prelude::*;

proptest! {
    #[test]
    fn regions_sorted_and_separated(
        ranges in proptest::collection::vec((0usize..2000, 0usize..40), 1..60),
    ) {
        let mut set = DirtyRegionSet::new();
        for (start, len) in ranges {
            set.add(start, start + len, 1e9, 1.0);
            if set.full_render_pending() {
                prop_assert!(set.regions().is_empty());
                break;
            }
            let regions = set.regions();
            prop_assert!(regions.len() <= MAX_REGIONS);
            for pair in regions.windows(2) {
                prop_assert!(pair[0].start_line <= pair[0].end_line);
                prop_assert!(pair[1].start_line > pair[0].end_line + MERGE_GAP);
            }
        }
    }

    #[test]
    fn merging_never_loses_lines(
        ranges in proptest::collection::vec((0usize..500, 0usize..10), 1..10),
    ) {
        let mut set = DirtyRegionSet::new();
        for &(start, len) in &ranges {
            set.add(start, start + len, 1e9, 1.0);
        }
        prop_assume!(!set.full_render_pending());
        for (start, len) in ranges {
            for line in start..=start + len {
                prop_assert!(set.regions().iter().any(|r| r.contains(line)));
            }
        }
    }

    #[test]
    fn coverage_threshold_matches_visible_rows(lines in 1usize..40) {
        // 600px / 26px rows -> 24 visible rows; 70% of that is 16.8.
        let mut set = DirtyRegionSet::new();
        set.add(100, 100 + lines - 1, 600.0, 26.0);
        prop_assert_eq!(set.full_render_pending(), lines >= 17);
    }
}
