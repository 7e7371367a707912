use super::FeeSample;

pub const DEFAULT_FEE_PERCENTILE: u8 = 75;

/// Priority fee at `percentile` (nearest-rank, clamped to 100) of the samples.
///
/// Zero when there are no samples.
pub fn suggest_priority_fee(samples: &[FeeSample], percentile: u8) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut fees: Vec<u64> = samples.iter().map(|s| s.fee).collect();
    fees.sort_unstable();
    let rank = (fees.len() - 1) * usize::from(percentile.min(100)) / 100;
    fees[rank]
}
