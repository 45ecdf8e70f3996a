//! Fixed-precision RFC 3339 timestamps.
//!
//! Timestamps are always rendered in UTC with nine fractional digits
//! (`2020-04-18T01:02:03.000000004Z`) so that serialized claims are
//! byte-stable regardless of the instant's precision.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn serialize<S>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&format(ts))
}

pub fn deserialize<'de, D>(d: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_nine_fractional_digits() {
        let ts = Utc.with_ymd_and_hms(2020, 4, 18, 1, 2, 3).unwrap()
            + chrono::Duration::nanoseconds(4);
        assert_eq!(format(&ts), "2020-04-18T01:02:03.000000004Z");

        let whole = Utc.with_ymd_and_hms(2020, 4, 18, 1, 2, 3).unwrap();
        assert_eq!(format(&whole), "2020-04-18T01:02:03.000000000Z");
    }

    #[test]
    fn parses_other_offsets_into_utc() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "deserialize")]
            at: DateTime<Utc>,
        }
        let w: Wrapper = serde_json::from_str(r#"{"at":"2020-04-18T03:02:03+02:00"}"#).unwrap();
        assert_eq!(format(&w.at), "2020-04-18T01:02:03.000000000Z");
    }
}
