use std::time::Duration;

/// Clamp a reputation-style score into an inclusive band.
pub fn clamp_i32(value: i32, min: i32, max: i32) -> i32 {
    value.max(min).min(max)
}

pub fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Capped exponential backoff: 100ms, 200ms, 400ms, ... up to `cap`.
pub fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let base = Duration::from_millis(100);
    let delay = base * 2u32.saturating_pow(attempt);
    delay.min(cap)
}

/// Lowercase hex, used for webhook signatures and cache fingerprints.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Constant-time byte comparison for signature checks.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_i32(1200, -1000, 1000), 1000);
        assert_eq!(clamp_i32(-1200, -1000, 1000), -1000);
        assert_eq!(clamp_i32(0, -1000, 1000), 0);
    }

    #[test]
    fn test_backoff_caps() {
        let cap = Duration::from_secs(2);
        assert_eq!(backoff_delay(0, cap), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, cap), Duration::from_millis(200));
        assert_eq!(backoff_delay(10, cap), cap);
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xff, 0x0a]), "00ff0a");
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }
}
