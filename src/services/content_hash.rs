use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Alert identity is a SHA-256 digest of a canonicalized string. Two
/// candidates that canonicalize identically collapse to one delivered alert,
/// enforced by the unique index on `alert_log.content_hash`.

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hour bucket used to scope price and social alerts to one alert per hour.
pub fn hour_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis() / 3_600_000
}

pub fn price_hash(symbol: &str, now: DateTime<Utc>) -> String {
    sha256_hex(&format!("price:{}:{}", symbol, hour_bucket(now)))
}

pub fn news_hash(url: &str) -> String {
    sha256_hex(&format!("news:{}", url))
}

pub fn social_hash(symbol: &str, now: DateTime<Utc>) -> String {
    sha256_hex(&format!("social:{}:{}", symbol, hour_bucket(now)))
}

/// One digest per user per day.
pub fn digest_hash(user_id: &str, now: DateTime<Utc>) -> String {
    sha256_hex(&format!(
        "digest:{}:{}",
        user_id,
        now.timestamp_millis() / 86_400_000
    ))
}

pub fn generic_hash(symbol: &str, title: &str, url: &str, now: DateTime<Utc>) -> String {
    sha256_hex(&format!(
        "{}:{}:{}:{}",
        symbol,
        title,
        url,
        hour_bucket(now)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_bucket_boundaries() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 14, 59, 59).unwrap();
        let t3 = Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap();
        assert_eq!(hour_bucket(t1), hour_bucket(t2));
        assert_eq!(hour_bucket(t3), hour_bucket(t1) + 1);
    }

    #[test]
    fn test_price_hash_stable_within_hour() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 14, 55, 0).unwrap();
        assert_eq!(price_hash("AAPL", t1), price_hash("AAPL", t2));
        assert_ne!(price_hash("AAPL", t1), price_hash("MSFT", t1));
    }

    #[test]
    fn test_news_hash_keyed_by_url() {
        assert_eq!(news_hash("https://a/b"), news_hash("https://a/b"));
        assert_ne!(news_hash("https://a/b"), news_hash("https://a/c"));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let h = generic_hash("TSLA", "title", "https://x", Utc::now());
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
