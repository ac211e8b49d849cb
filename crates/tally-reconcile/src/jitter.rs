use std::time::Duration;

use rand::Rng;

/// Largest accepted jitter percentage; 100 would allow a zero interval.
pub const MAX_JITTER_PERCENT: u8 = 99;

/// Floor applied to every interval so a tiny base never yields zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Randomize `base` uniformly within `max_jitter_percent` of itself.
///
/// Percentages above [`MAX_JITTER_PERCENT`] are clamped.
pub fn next_interval(base: Duration, max_jitter_percent: u8) -> Duration {
    next_interval_with(&mut rand::thread_rng(), base, max_jitter_percent)
}

/// [`next_interval`] with a caller-supplied random source.
pub fn next_interval_with<R: Rng + ?Sized>(
    rng: &mut R,
    base: Duration,
    max_jitter_percent: u8,
) -> Duration {
    let p = u128::from(max_jitter_percent.min(MAX_JITTER_PERCENT));
    let nanos = base.as_nanos();
    let lo = nanos * (100 - p) / 100;
    let hi = nanos * (100 + p) / 100;

    let picked = if lo < hi { rng.gen_range(lo..=hi) } else { lo };
    let picked = u64::try_from(picked).unwrap_or(u64::MAX);
    Duration::from_nanos(picked).max(MIN_INTERVAL)
}
