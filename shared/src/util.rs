/// One minute in milliseconds
pub const MINUTE_MILLIS: i64 = 60 * 1000;

/// One hour in milliseconds
pub const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;

/// One day in milliseconds
pub const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a human-readable order number for the given instant.
///
/// Layout: `KO` + `yyyyMMddHHmmss` (UTC) + 6 random digits, e.g.
/// `KO20260114183005042917`. Uniqueness is enforced by storage at insert
/// time; the random suffix only keeps collisions rare.
pub fn order_number(at_millis: i64) -> String {
    use rand::Rng;
    let stamp = chrono::DateTime::from_timestamp_millis(at_millis)
        .unwrap_or_default()
        .format("%Y%m%d%H%M%S");
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("KO{}{:06}", stamp, suffix)
}

/// Half-open interval overlap: `[s1, e1)` and `[s2, e2)` conflict iff
/// `s1 < e2 && s2 < e1`.
#[inline]
pub fn intervals_overlap(s1: i64, e1: i64, s2: i64, e2: i64) -> bool {
    s1 < e2 && s2 < e1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_number_format() {
        // 2026-01-14T18:30:05Z
        let n = order_number(1_768_415_405_000);
        assert!(n.starts_with("KO20260114183005"), "got {n}");
        assert_eq!(n.len(), 2 + 14 + 6);
        assert!(n[2..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_intervals_overlap_half_open() {
        // Touching intervals do not conflict
        assert!(!intervals_overlap(10, 12, 12, 14));
        assert!(!intervals_overlap(12, 14, 10, 12));
        // Partial overlap
        assert!(intervals_overlap(10, 12, 11, 13));
        // Containment
        assert!(intervals_overlap(10, 20, 12, 14));
        assert!(intervals_overlap(12, 14, 10, 20));
        // Identical
        assert!(intervals_overlap(10, 12, 10, 12));
    }
}
