//! Property-based tests for the page-range codec and derived scores
//!
//! - Round-trip: parse(compress(S), max) == S for every S within [1, max]
//! - Canonical form: compressing a parsed string is idempotent
//! - Permissive parsing: output never leaves [1, max]
//! - Mastery stays within [0, 100] and is undefined without attempts
//! - Final grade blend stays in [1, 30] and is monotonic

use std::collections::BTreeSet;

use proptest::prelude::*;

use studyhub_engine::services::assessment::blend_final_grade;
use studyhub_engine::services::page_ranges::{compress_page_ranges, normalize_page_ranges, parse_page_ranges};
use studyhub_engine::services::progress::mastery_score;
use studyhub_engine::types::{ExerciseStats, SimulationStats};

// ============================================================================
// Generators
// ============================================================================

fn arb_page_set() -> impl Strategy<Value = (u32, BTreeSet<u32>)> {
    (0u32..=300).prop_flat_map(|max| {
        let pages = if max == 0 {
            Just(BTreeSet::new()).boxed()
        } else {
            prop::collection::btree_set(1..=max, 0..=(max as usize).min(120)).boxed()
        };
        (Just(max), pages)
    })
}

/// Half-credit steps, never more credit than appearances.
fn arb_stats() -> impl Strategy<Value = (u32, f64)> {
    (0u32..=500).prop_flat_map(|appearances| (Just(appearances), (0..=appearances * 2).prop_map(|h| h as f64 / 2.0)))
}

// ============================================================================
// Codec
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_round_trip((max, pages) in arb_page_set()) {
        let compressed = compress_page_ranges(&pages);
        prop_assert_eq!(parse_page_ranges(&compressed, max), pages);
    }

    #[test]
    fn prop_normalize_is_idempotent((max, pages) in arb_page_set()) {
        let canonical = compress_page_ranges(&pages);
        prop_assert_eq!(normalize_page_ranges(&canonical, max), canonical.clone());
        let twice = normalize_page_ranges(&normalize_page_ranges(&canonical, max), max);
        prop_assert_eq!(twice, canonical);
    }

    #[test]
    fn prop_parse_stays_in_bounds(raw in "[0-9, \\-a-z]{0,40}", max in 0u32..=50) {
        let pages = parse_page_ranges(&raw, max);
        prop_assert!(pages.iter().all(|p| *p >= 1 && *p <= max));
    }

    #[test]
    fn prop_no_range_shorter_than_three((_max, pages) in arb_page_set()) {
        let compressed = compress_page_ranges(&pages);
        for token in compressed.split(", ").filter(|t| t.contains('-')) {
            let (a, b) = token.split_once('-').unwrap();
            let (a, b): (u32, u32) = (a.parse().unwrap(), b.parse().unwrap());
            prop_assert!(b - a + 1 > 2, "run {} too short", token);
        }
    }
}

#[test]
fn test_canonical_examples() {
    let set = |pages: &[u32]| pages.iter().copied().collect::<BTreeSet<u32>>();
    assert_eq!(compress_page_ranges(&set(&[4, 5])), "4, 5");
    assert_eq!(compress_page_ranges(&set(&[4, 5, 6])), "4-6");
    assert_eq!(compress_page_ranges(&set(&[1, 3, 5])), "1, 3, 5");
}

// ============================================================================
// Scores
// ============================================================================

proptest! {
    #[test]
    fn prop_mastery_bounds((ex_app, ex_done) in arb_stats(), (sim_app, sim_ok) in arb_stats()) {
        let score = mastery_score(
            &ExerciseStats { appearances: ex_app, completed: ex_done },
            &SimulationStats { appearances: sim_app, correct: sim_ok },
        );
        if ex_app + sim_app == 0 {
            prop_assert_eq!(score, None);
        } else {
            let value = score.unwrap();
            prop_assert!(value <= 100);
        }
    }

    #[test]
    fn prop_final_grade_blend(written in 0.0f64..=30.0, oral in 0.0f64..=30.0, bump in 0.5f64..=5.0) {
        let base = blend_final_grade(written, oral, 0.4);
        prop_assert!((1.0..=30.0).contains(&base));
        prop_assert!(blend_final_grade(written + bump, oral, 0.4) >= base);
        prop_assert!(blend_final_grade(written, oral + bump, 0.4) >= base);
    }
}
