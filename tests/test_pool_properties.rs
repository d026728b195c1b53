use std::collections::HashMap;

use mempool::{Pool, PoolFlags, PoolPtr, HEADER_SIZE};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Free(usize),
    Realloc(usize, usize),
    Lock(usize),
    Unlock(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..300).prop_map(Op::Alloc),
        3 => any::<usize>().prop_map(Op::Free),
        2 => (any::<usize>(), 0usize..400).prop_map(|(i, n)| Op::Realloc(i, n)),
        1 => any::<usize>().prop_map(Op::Lock),
        1 => any::<usize>().prop_map(Op::Unlock),
    ]
}

struct Live {
    ptr: PoolPtr,
    /// Prefix known to hold `fill`
    len: usize,
    fill: u8,
    locked: bool,
}

fn check_invariants(pool: &Pool, live: &[Live]) -> Result<(), TestCaseError> {
    // Tiling: per segment, header + payload spans cover the capacity exactly.
    let mut spans: HashMap<usize, (usize, usize)> = HashMap::new();
    pool.walk(|segment, block| {
        spans.entry(segment.id).or_insert((segment.size, 0)).1 += HEADER_SIZE + block.size;
    });
    prop_assert_eq!(spans.len(), pool.segment_count());
    for (size, covered) in spans.values() {
        prop_assert_eq!(size, covered);
    }

    // Busy-size conservation.
    let stats = pool.stats();
    let outstanding: usize = live.iter().filter_map(|l| pool.payload_len(l.ptr)).sum();
    prop_assert_eq!(stats.used_bytes, outstanding);
    prop_assert_eq!(stats.busy_blocks, live.len());
    prop_assert_eq!(stats.locked_blocks, live.iter().filter(|l| l.locked).count());

    for entry in live {
        let bytes = pool.read(entry.ptr);
        prop_assert!(bytes.is_some());
        let bytes = bytes.unwrap_or_default();
        prop_assert!(bytes[..entry.len].iter().all(|&b| b == entry.fill));
    }
    Ok(())
}

fn run(flags: PoolFlags, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let pool = Pool::create(512, flags).expect("pool");
    let growable = flags.contains(PoolFlags::EXPAND);
    let mut live: Vec<Live> = Vec::new();
    let mut next_fill = 0u8;

    for op in ops {
        match op {
            Op::Alloc(n) => match pool.alloc(n) {
                Some(ptr) => {
                    next_fill = next_fill.wrapping_add(1);
                    prop_assert!(pool.write(ptr, 0, &vec![next_fill; n]));
                    live.push(Live {
                        ptr,
                        len: n,
                        fill: next_fill,
                        locked: false,
                    });
                }
                None => prop_assert!(!growable),
            },
            Op::Free(i) if !live.is_empty() => {
                let i = i % live.len();
                let freed = pool.free(live[i].ptr);
                prop_assert_eq!(freed, !live[i].locked);
                if freed {
                    live.swap_remove(i);
                }
            }
            Op::Realloc(i, n) if !live.is_empty() => {
                let i = i % live.len();
                match pool.realloc(live[i].ptr, n) {
                    Some(ptr) => {
                        prop_assert!(!live[i].locked);
                        live[i].ptr = ptr;
                        live[i].len = live[i].len.min(n);
                    }
                    None => prop_assert!(live[i].locked || !growable),
                }
            }
            Op::Lock(i) if !live.is_empty() => {
                let i = i % live.len();
                prop_assert!(pool.lock(live[i].ptr));
                live[i].locked = true;
            }
            Op::Unlock(i) if !live.is_empty() => {
                let i = i % live.len();
                prop_assert_eq!(pool.unlock(live[i].ptr), live[i].locked);
                live[i].locked = false;
            }
            _ => {}
        }
        check_invariants(&pool, &live)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn best_fit_growable_keeps_invariants(ops in proptest::collection::vec(op(), 1..120)) {
        run(PoolFlags::EXPAND, ops)?;
    }

    #[test]
    fn fast_fixed_keeps_invariants(ops in proptest::collection::vec(op(), 1..120)) {
        run(PoolFlags::FAST, ops)?;
    }

    #[test]
    fn fast_growable_keeps_invariants(ops in proptest::collection::vec(op(), 1..120)) {
        run(PoolFlags::FAST | PoolFlags::EXPAND, ops)?;
    }

    #[test]
    fn free_then_alloc_reuses_space(size in 1usize..400) {
        let pool = Pool::create(512, PoolFlags::NONE).expect("pool");
        let first = pool.alloc(size);
        prop_assume!(first.is_some());
        let first = first.unwrap();
        let before = pool.stats();

        prop_assert!(pool.free(first));
        let again = pool.alloc(size);
        prop_assert_eq!(again, Some(first));
        prop_assert_eq!(pool.stats().used_bytes, before.used_bytes);
    }
}
