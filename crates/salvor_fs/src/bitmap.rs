//! Allocation-bitmap decoding shared by the probers.
//!
//! Bit `i` of byte `i / 8` (LSB first) describes allocation unit `i`;
//! bit 0 means free in every filesystem handled here.

/// Decodes `bitmap` into runs of free units.
///
/// Returns `(runs, free_count)` where each run is a half-open
/// `(start_unit, end_unit)` interval, sorted and disjoint by
/// construction. Bits past `unit_count` are ignored, as is any tail
/// the bitmap is too short to describe.
#[must_use]
pub fn bitmap_free_runs(bitmap: &[u8], unit_count: u64) -> (Vec<(u64, u64)>, u64) {
    let describable = (bitmap.len() as u64 * 8).min(unit_count);
    let mut runs = Vec::new();
    let mut free_count = 0u64;
    let mut run_start: Option<u64> = None;

    for unit in 0..describable {
        let byte = bitmap[(unit >> 3) as usize];
        let allocated = (byte >> (unit & 7)) & 1 == 1;
        if !allocated {
            free_count += 1;
            if run_start.is_none() {
                run_start = Some(unit);
            }
        } else if let Some(start) = run_start.take() {
            runs.push((start, unit));
        }
    }
    if let Some(start) = run_start {
        runs.push((start, describable));
    }
    (runs, free_count)
}

/// Maps unit runs to byte ranges with a linear transform.
#[must_use]
pub fn runs_to_byte_ranges(
    runs: &[(u64, u64)],
    unit_size: u64,
    base_offset: u64,
) -> Vec<(u64, u64)> {
    runs.iter()
        .map(|&(start, end)| {
            (
                base_offset + start * unit_size,
                base_offset + end * unit_size,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_free() {
        let (runs, count) = bitmap_free_runs(&[0x00, 0x00], 16);
        assert_eq!(runs, vec![(0, 16)]);
        assert_eq!(count, 16);
    }

    #[test]
    fn test_all_allocated() {
        let (runs, count) = bitmap_free_runs(&[0xFF, 0xFF], 16);
        assert!(runs.is_empty());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_mixed_runs_lsb_first() {
        // 0b0000_0110: units 1,2 allocated; 0 and 3..8 free.
        let (runs, count) = bitmap_free_runs(&[0b0000_0110], 8);
        assert_eq!(runs, vec![(0, 1), (3, 8)]);
        assert_eq!(count, 6);
    }

    #[test]
    fn test_unit_count_caps_bitmap() {
        let (runs, count) = bitmap_free_runs(&[0x00], 5);
        assert_eq!(runs, vec![(0, 5)]);
        assert_eq!(count, 5);
    }

    #[test]
    fn test_short_bitmap_caps_units() {
        let (runs, _) = bitmap_free_runs(&[0x00], 100);
        assert_eq!(runs, vec![(0, 8)]);
    }

    #[test]
    fn test_byte_mapping() {
        let ranges = runs_to_byte_ranges(&[(0, 2), (5, 6)], 4096, 1_000_000);
        assert_eq!(ranges, vec![(1_000_000, 1_008_192), (1_020_480, 1_024_576)]);
    }
}
