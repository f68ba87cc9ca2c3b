//! Shared proptest strategies for codec tests.

use proptest::collection::vec;
use proptest::prelude::*;

/// Strategy for generating well-formed feature lines.
///
/// Covers optional case tags, flat and grouped payloads, and arbitrary
/// stride/extent triples.
pub fn arb_feature_line() -> impl Strategy<Value = String> {
    (
        proptest::option::of(0u32..1000),
        1u64..4096,
        1u64..4096,
        0u64..2,
        1u64..6,
        1u64..1_000_000,
        0u64..4,
        vec(vec(0u64..512, 3), 0..4),
    )
        .prop_map(|(case, runs, loops, dir, bufs, size, cons, dims)| {
            let mut line = String::new();
            if let Some(case) = case {
                line.push_str(&format!("@{case} "));
            }
            line.push_str(&format!(
                "{runs} {loops} features:{dir} {bufs} {size} {cons}"
            ));
            for dim in dims {
                let triple = dim
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                line.push_str(&format!(" ; {triple}"));
            }
            line
        })
}
