//! Retry backoff with jitter (§4.4).
//!
//! Handler-specific curves compute a `base` delay in milliseconds from
//! `retry_count`; [`with_jitter`] adds a uniformly-sampled amount in
//! `[base/10, base/4]` on top, so that a fleet of retries triggered by the
//! same downstream outage doesn't all re-fire at the same instant.

use rand::Rng;

const ONE_HOUR_MS: i64 = 3_600_000;

/// Order-cancel backoff: `2^retry_count` hours for the first three attempts,
/// then the engine-wide default.
pub fn order_cancel_base_ms(retry_count: i32, default_delay_hours: i32) -> i64 {
    let hours = match retry_count {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => default_delay_hours,
    };
    i64::from(hours) * ONE_HOUR_MS
}

/// Payment refund/void backoff: more conservative than order-cancel to
/// reduce duplicate-effect risk on money movement.
pub fn payment_base_ms(retry_count: i32, default_delay_hours: i32) -> i64 {
    let hours = match retry_count {
        0 => 2,
        1 => 6,
        2 => 9,
        _ => default_delay_hours,
    };
    i64::from(hours) * ONE_HOUR_MS
}

/// Add jitter uniformly sampled from `[base/10, base/4]` to `base`.
pub fn with_jitter(base_ms: i64) -> i64 {
    let lo = base_ms / 10;
    let hi = base_ms / 4;
    if hi <= lo {
        return base_ms;
    }
    let jitter = rand::rng().random_range(lo..=hi);
    base_ms + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_cancel_curve_doubles_for_first_three_attempts() {
        assert_eq!(order_cancel_base_ms(0, 24), ONE_HOUR_MS);
        assert_eq!(order_cancel_base_ms(1, 24), 2 * ONE_HOUR_MS);
        assert_eq!(order_cancel_base_ms(2, 24), 4 * ONE_HOUR_MS);
        assert_eq!(order_cancel_base_ms(3, 24), 24 * ONE_HOUR_MS);
    }

    #[test]
    fn payment_curve_is_more_conservative() {
        assert_eq!(payment_base_ms(0, 24), 2 * ONE_HOUR_MS);
        assert_eq!(payment_base_ms(1, 24), 6 * ONE_HOUR_MS);
        assert_eq!(payment_base_ms(2, 24), 9 * ONE_HOUR_MS);
        assert_eq!(payment_base_ms(3, 24), 24 * ONE_HOUR_MS);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = 4 * ONE_HOUR_MS;
        for _ in 0..200 {
            let delayed = with_jitter(base);
            assert!(delayed >= base + base / 10);
            assert!(delayed <= base + base / 4);
        }
    }

    #[test]
    fn jitter_is_noop_for_tiny_base() {
        assert_eq!(with_jitter(1), 1);
    }
}
