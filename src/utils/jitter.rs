//! Jitter helpers for pacing and retry backoff

use rand::Rng;
use std::time::Duration;

/// Generate a uniformly random jitter between 0 and `max_jitter_ms` (inclusive)
///
/// # Examples
/// ```
/// use impression_scheduler::utils::jitter::generate_jitter_ms;
///
/// let jitter = generate_jitter_ms(100);
/// assert!(jitter <= 100);
/// ```
pub fn generate_jitter_ms(max_jitter_ms: u64) -> u64 {
    if max_jitter_ms == 0 {
        return 0;
    }
    rand::rng().random_range(0..=max_jitter_ms)
}

/// Generate jitter as a percentage of a base value
///
/// # Examples
/// ```
/// use impression_scheduler::utils::jitter::generate_jitter_percent;
///
/// let jitter = generate_jitter_percent(1000, 25); // 0-250ms
/// assert!(jitter <= 250);
/// ```
pub fn generate_jitter_percent(base_value: u64, jitter_percent: u8) -> u64 {
    if jitter_percent == 0 || base_value == 0 {
        return 0;
    }

    let max_jitter = (base_value * jitter_percent as u64) / 100;
    generate_jitter_ms(max_jitter)
}

/// Random duration in `[0, max]` drawn from the caller's generator
pub fn jitter_duration<R: Rng>(rng: &mut R, max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.random_range(0..=max_ms))
}

/// Random duration in `[min, max]` drawn from the caller's generator
pub fn duration_between<R: Rng>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    min + jitter_duration(rng, max - min)
}

/// `base` plus up to `jitter_percent` of itself
pub fn with_jitter_percent(base: Duration, jitter_percent: u8) -> Duration {
    let base_ms = base.as_millis() as u64;
    base + Duration::from_millis(generate_jitter_percent(base_ms, jitter_percent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_generate_jitter_ms() {
        assert_eq!(generate_jitter_ms(0), 0);

        for _ in 0..100 {
            let jitter = generate_jitter_ms(50);
            assert!(jitter <= 50);
        }
    }

    #[test]
    fn test_generate_jitter_percent() {
        assert_eq!(generate_jitter_percent(1000, 0), 0);
        assert_eq!(generate_jitter_percent(0, 25), 0);

        for _ in 0..100 {
            let jitter = generate_jitter_percent(1000, 25);
            assert!(jitter <= 250);
        }
    }

    #[test]
    fn test_duration_between_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let min = Duration::from_secs(300);
        let max = Duration::from_secs(1500);
        for _ in 0..200 {
            let d = duration_between(&mut rng, min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(duration_between(&mut rng, max, min), max);
    }

    #[test]
    fn test_jitter_duration_zero_max() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(jitter_duration(&mut rng, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_with_jitter_percent() {
        let base = Duration::from_secs(5);
        for _ in 0..50 {
            let d = with_jitter_percent(base, 20);
            assert!(d >= base && d <= Duration::from_secs(6));
        }
    }
}
