use std::time::Duration;

const MAX_DELAY_MILLIS: f64 = 300_000.0;

/// 秒数转为 Duration，负数与 NaN 视为 0，上限 300 秒
pub fn delay_from_secs(delay_secs: f64) -> Duration {
    if delay_secs.is_nan() {
        return Duration::ZERO;
    }
    let millis = (delay_secs * 1000.0).clamp(0.0, MAX_DELAY_MILLIS) as u64;
    Duration::from_millis(millis)
}
