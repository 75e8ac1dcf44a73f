use docseal_ids::{IdError, IdentifierManager};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    ReserveNew,
    Reserve(u64),
    Release(u64),
}

/// Ids are generated slightly outside the managed range so out-of-bounds paths are exercised.
fn op_strategy(lower: u64, upper: u64) -> impl Strategy<Value = Op> {
    let lo = lower.saturating_sub(2);
    let hi = upper + 2;
    prop_oneof![
        1 => Just(Op::ReserveNew),
        2 => (lo..=hi).prop_map(Op::Reserve),
        2 => (lo..=hi).prop_map(Op::Release),
    ]
}

fn scenario() -> impl Strategy<Value = (u64, u64, Vec<Op>)> {
    (0u64..8, 0u64..48).prop_flat_map(|(lower, width)| {
        let upper = lower + width;
        (
            Just(lower),
            Just(upper),
            prop::collection::vec(op_strategy(lower, upper), 0..200),
        )
    })
}

/// Free runs of the bitset oracle, as inclusive `(first, last)` pairs.
fn oracle_segments(lower: u64, reserved: &[bool]) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut run_start: Option<u64> = None;
    for (idx, &taken) in reserved.iter().enumerate() {
        let id = lower + idx as u64;
        match (taken, run_start) {
            (false, None) => run_start = Some(id),
            (true, Some(start)) => {
                out.push((start, id - 1));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        out.push((start, lower + reserved.len() as u64 - 1));
    }
    out
}

fn first_free(lower: u64, reserved: &[bool]) -> Option<u64> {
    reserved
        .iter()
        .position(|taken| !taken)
        .map(|idx| lower + idx as u64)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x1D5),
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn matches_bitset_oracle((lower, upper, ops) in scenario()) {
        let mut ids = IdentifierManager::new(lower, upper).expect("valid range");
        let mut reserved = vec![false; (upper - lower + 1) as usize];
        let in_range = |id: u64| id >= lower && id <= upper;

        for op in ops {
            match op {
                Op::ReserveNew => match first_free(lower, &reserved) {
                    Some(expected) => {
                        prop_assert_eq!(ids.reserve_new(), Ok(expected));
                        reserved[(expected - lower) as usize] = true;
                    }
                    None => prop_assert_eq!(ids.reserve_new(), Err(IdError::Exhausted { lower, upper })),
                },
                Op::Reserve(id) if !in_range(id) => {
                    prop_assert_eq!(ids.reserve(id), Err(IdError::OutOfBounds { id, lower, upper }));
                }
                Op::Reserve(id) => {
                    let expected = if reserved[(id - lower) as usize] {
                        first_free(lower, &reserved)
                    } else {
                        Some(id)
                    };
                    match expected {
                        Some(expected) => {
                            prop_assert_eq!(ids.reserve(id), Ok(expected));
                            reserved[(expected - lower) as usize] = true;
                        }
                        None => prop_assert_eq!(ids.reserve(id), Err(IdError::Exhausted { lower, upper })),
                    }
                }
                Op::Release(id) if !in_range(id) => {
                    prop_assert_eq!(ids.release(id), Err(IdError::OutOfBounds { id, lower, upper }));
                }
                Op::Release(id) => {
                    let was_reserved = reserved[(id - lower) as usize];
                    prop_assert_eq!(ids.release(id), Ok(was_reserved));
                    reserved[(id - lower) as usize] = false;
                }
            }

            let taken = reserved.iter().filter(|taken| **taken).count() as u64;
            prop_assert_eq!(ids.remaining(), (upper - lower + 1) - taken);

            let segments: Vec<(u64, u64)> = ids.segments().collect();
            for pair in segments.windows(2) {
                prop_assert!(pair[0].1 + 1 < pair[1].0, "segments touch or overlap: {:?}", pair);
            }
            prop_assert_eq!(segments, oracle_segments(lower, &reserved));
        }
    }
}
