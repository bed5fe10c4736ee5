//! Logical-expiry wrapper stored under keys without a physical TTL.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// `{"expireTime": <RFC 3339>, "data": <value>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEntry<T> {
    #[serde(with = "time::serde::rfc3339")]
    pub expire_time: OffsetDateTime,
    pub data: T,
}

impl<T> LogicalEntry<T> {
    pub fn new(data: T, expire_time: OffsetDateTime) -> Self {
        Self { expire_time, data }
    }

    /// An entry is stale from its expire time onwards.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expire_time <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_wire_shape() {
        let entry = LogicalEntry::new(json!({"id": 1}), datetime!(2026-10-17 08:30:00.123456789 UTC));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["expireTime"], "2026-10-17T08:30:00.123456789Z");
        assert_eq!(value["data"]["id"], 1);
    }

    #[test]
    fn test_timestamp_survives_exactly() {
        let at = datetime!(2026-10-17 08:30:00.000000001 +08:00);
        let bytes = serde_json::to_vec(&LogicalEntry::new(5u32, at)).unwrap();
        let back: LogicalEntry<u32> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.expire_time, at);
        assert_eq!(back.data, 5);
    }

    #[test]
    fn test_expiry_boundary() {
        let at = datetime!(2026-10-17 08:30 UTC);
        let entry = LogicalEntry::new((), at);
        assert!(!entry.is_expired_at(at - time::Duration::seconds(1)));
        assert!(entry.is_expired_at(at));
    }
}
