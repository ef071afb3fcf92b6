//! Recency model for similarity re-ranking

/// Age at which the boost bottoms out.
pub const RECENCY_HORIZON_DAYS: f32 = 180.0;

/// Total swing of the boost around 1.0.
pub const RECENCY_WEIGHT: f32 = 0.3;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Multiplicative recency boost for an observation `age_days` old:
/// 1.15 at age zero, 1.0 at 90 days, 0.85 from 180 days on, linear in
/// between. Ages are clamped to the horizon, so the boost is monotonically
/// non-increasing.
pub fn recency_boost(age_days: f32) -> f32 {
    let clamped = age_days.clamp(0.0, RECENCY_HORIZON_DAYS);
    1.0 + RECENCY_WEIGHT * (0.5 - clamped / RECENCY_HORIZON_DAYS)
}

/// Age in days of an event timestamp relative to `now`, both epoch
/// milliseconds.
pub(crate) fn age_days(timestamp_ms: i64, now_ms: i64) -> f32 {
    ((now_ms - timestamp_ms) as f64 / MS_PER_DAY) as f32
}
