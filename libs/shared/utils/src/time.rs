use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Current time at the microsecond precision Postgres keeps, so a value read
/// back compares equal to the one written.
pub fn now_micros() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

pub fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// A new `updated_at` strictly after `previous`, even when the clock has not
/// moved past it.
pub fn advance_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = truncate_micros(now);
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncation_drops_nanoseconds() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(truncate_micros(ts).timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn advance_is_strictly_monotonic() {
        let previous = Utc.timestamp_opt(1_700_000_000, 5_000).unwrap();
        let stale_clock = previous - Duration::seconds(1);

        assert!(advance_timestamp(previous, stale_clock) > previous);
        assert!(advance_timestamp(previous, previous) > previous);

        let later = previous + Duration::seconds(3);
        assert_eq!(advance_timestamp(previous, later), later);
    }
}
