use std::ops::Range;

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::OrchestrationResult;

/// Contiguous slice of `[0, total)` owned by shard `index` of `shards`. The first
/// `total % shards` shards take one extra item.
pub fn shard_range(total: usize, shards: usize, index: usize) -> OrchestrationResult<Range<usize>> {
    if shards == 0 {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "shard count must be at least 1",
        ));
    }

    if index >= shards {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("shard index {index} is out of range for {shards} shards"),
        ));
    }

    let base = total / shards;
    let remainder = total % shards;
    let start = index * base + index.min(remainder);
    let len = base + usize::from(index < remainder);
    Ok(start..start + len)
}

#[cfg(test)]
mod tests {
    use super::shard_range;
    use crate::models::CoreErrorKind;

    #[test]
    fn ten_items_over_three_shards() {
        assert_eq!(shard_range(10, 3, 0).unwrap(), 0..4);
        assert_eq!(shard_range(10, 3, 1).unwrap(), 4..7);
        assert_eq!(shard_range(10, 3, 2).unwrap(), 7..10);
    }

    #[test]
    fn shards_tile_the_input() {
        for total in 0..40 {
            for shards in 1..9 {
                let ranges: Vec<_> = (0..shards)
                    .map(|index| shard_range(total, shards, index).unwrap())
                    .collect();

                assert_eq!(ranges[0].start, 0);
                assert_eq!(ranges[shards - 1].end, total);
                for pair in ranges.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                    assert!(pair[0].len() >= pair[1].len());
                    assert!(pair[0].len() - pair[1].len() <= 1);
                }
            }
        }
    }

    #[test]
    fn more_shards_than_items_leaves_trailing_shards_empty() {
        assert_eq!(shard_range(2, 4, 1).unwrap(), 1..2);
        assert!(shard_range(2, 4, 3).unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert_eq!(
            shard_range(5, 0, 0).unwrap_err().kind,
            CoreErrorKind::InvalidInput
        );
        assert_eq!(
            shard_range(5, 2, 2).unwrap_err().kind,
            CoreErrorKind::InvalidInput
        );
    }
}
