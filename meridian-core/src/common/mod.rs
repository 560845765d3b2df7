//! Shared helpers used across the core: duration (de)serialization and the
//! listener-id sentinel returned once a breaker/monitor's listener cap is hit.

pub mod duration_serde;

/// Returned by `add_listener` once a component's listener cap has been reached.
pub const UNASSIGNED_LISTENER_ID: u64 = 0;

#[cfg(test)]
mod tests {
    use super::duration_serde;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "duration_serde")]
        d: Duration,
    }

    #[test]
    fn round_trips_seconds() {
        let w = Wrapper {
            d: Duration::from_secs(30),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"d":"30s"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.d, Duration::from_secs(30));
    }

    #[test]
    fn parses_milliseconds() {
        let back: Wrapper = serde_json::from_str(r#"{"d":"500ms"}"#).unwrap();
        assert_eq!(back.d, Duration::from_millis(500));
    }

    #[test]
    fn parses_minutes_and_hours() {
        let m: Wrapper = serde_json::from_str(r#"{"d":"2m"}"#).unwrap();
        assert_eq!(m.d, Duration::from_secs(120));
        let h: Wrapper = serde_json::from_str(r#"{"d":"1h"}"#).unwrap();
        assert_eq!(h.d, Duration::from_secs(3600));
    }

    #[test]
    fn accepts_object_form() {
        let back: Wrapper = serde_json::from_str(r#"{"d":{"secs":5,"nanos":0}}"#).unwrap();
        assert_eq!(back.d, Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_unit() {
        let result: Result<Wrapper, _> = serde_json::from_str(r#"{"d":"5x"}"#);
        assert!(result.is_err());
    }
}
