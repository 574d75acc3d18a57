//! Part sizing for multipart uploads.
//!
//! Picks the smallest part count that respects both the store's minimum part
//! size and its maximum part count, defaulting to 10 MiB parts for moderate
//! files. Clients persist the result, so the arithmetic must stay stable.

use thiserror::Error;

pub const MIB: u64 = 1024 * 1024;

/// Smallest part the store accepts (except for the last one).
pub const MIN_PART_SIZE: u64 = 5 * MIB;
pub const DEFAULT_PART_SIZE: u64 = 10 * MIB;
/// Largest single part the store accepts.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;
pub const MAX_PARTS: u64 = 10_000;

/// Below this size a single presigned PUT is used.
pub const MULTIPART_THRESHOLD: u64 = MIN_PART_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub part_size_bytes: u64,
    pub total_parts: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("file too large: {size_bytes} bytes would need {parts} parts (max {max_parts})")]
pub struct PartCountExceeded {
    pub size_bytes: u64,
    pub parts: u64,
    pub max_parts: u64,
}

/// Compute the part size for an object of `size_bytes`.
pub fn compute_part_size(size_bytes: u64) -> Result<PartPlan, PartCountExceeded> {
    let size_for_max_parts = size_bytes.div_ceil(MAX_PARTS);
    let rounded_to_mb = size_for_max_parts.div_ceil(MIB) * MIB;
    let part_size = DEFAULT_PART_SIZE
        .max(rounded_to_mb)
        .max(MIN_PART_SIZE)
        .min(MAX_PART_SIZE);

    let parts = size_bytes.div_ceil(part_size);
    if parts > MAX_PARTS {
        return Err(PartCountExceeded {
            size_bytes,
            parts,
            max_parts: MAX_PARTS,
        });
    }

    Ok(PartPlan {
        part_size_bytes: part_size,
        total_parts: parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    #[test]
    fn moderate_files_use_default_part_size() {
        let plan = compute_part_size(52 * MIB).unwrap();
        assert_eq!(plan.part_size_bytes, DEFAULT_PART_SIZE);
        assert_eq!(plan.total_parts, 6);

        let plan = compute_part_size(MULTIPART_THRESHOLD).unwrap();
        assert_eq!(plan.part_size_bytes, DEFAULT_PART_SIZE);
        assert_eq!(plan.total_parts, 1);
    }

    #[test]
    fn large_files_round_up_to_whole_mebibytes() {
        // ceil(100 GiB / 10000) = 10737419 bytes, rounded up to 11 MiB.
        let plan = compute_part_size(100 * GIB).unwrap();
        assert_eq!(plan.part_size_bytes, 11 * MIB);
        assert_eq!(plan.total_parts, 9310);
    }

    #[test]
    fn part_count_never_exceeds_limit() {
        for size in [
            5 * MIB,
            5 * MIB + 1,
            97 * GIB + 12345,
            200 * GIB,
            TIB,
            5 * TIB,
        ] {
            let plan = compute_part_size(size).unwrap();
            assert!(plan.part_size_bytes >= MIN_PART_SIZE);
            assert!(plan.part_size_bytes % MIB == 0);
            assert!(size.div_ceil(plan.part_size_bytes) <= MAX_PARTS, "size {size}");
            assert_eq!(plan.total_parts, size.div_ceil(plan.part_size_bytes));
        }
    }

    #[test]
    fn beyond_part_ceiling_is_rejected() {
        let err = compute_part_size(60 * TIB).unwrap_err();
        assert_eq!(err.max_parts, MAX_PARTS);
        assert_eq!(err.parts, 12288);
    }
}
