use chrono::{DateTime, FixedOffset, SecondsFormat, TimeDelta};
use rocket::serde::{Deserialize, Serialize};

// instant with an explicit offset, stored in SQL as an ISO-8601 TEXT column
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy)]
pub struct EvDateTime(pub DateTime<FixedOffset>);
impl EvDateTime {
    pub fn now() -> Self {
        Self::from_fixed_offset(chrono::Local::now().fixed_offset())
    }
    pub fn from_fixed_offset(datetime: DateTime<FixedOffset>) -> EvDateTime {
        let millis = datetime.timestamp_subsec_millis();
        let nanos = datetime.timestamp_subsec_nanos() - millis * 1_000_000;
        if let Some(dt) = datetime.checked_sub_signed(TimeDelta::nanoseconds(nanos as i64)) {
            EvDateTime(dt)
        } else {
            EvDateTime(datetime)
        }
    }
    pub fn trimmed_to_sec(&self) -> Self {
        let nanos = self.0.timestamp_subsec_nanos();
        if let Some(dt) = self.0.checked_sub_signed(TimeDelta::nanoseconds(nanos as i64)) {
            EvDateTime(dt)
        } else {
            *self
        }
    }
    pub fn to_iso_string(self) -> String {
        if self.0.timestamp_subsec_millis() == 0 {
            self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
        } else {
            self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
        }
    }
    pub fn from_iso_string(datetime_str: &str) -> Result<Self, anyhow::Error> {
        let dt = DateTime::parse_from_rfc3339(datetime_str)?;
        Ok(Self::from_fixed_offset(dt))
    }
}

impl From<DateTime<FixedOffset>> for EvDateTime {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::from_fixed_offset(value)
    }
}
impl<DB: sqlx::Database> sqlx::Type<DB> for EvDateTime
where
    str: sqlx::Type<DB>,
{
    fn type_info() -> <DB as sqlx::Database>::TypeInfo {
        <&str as sqlx::Type<DB>>::type_info()
    }
}
impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for EvDateTime
where
    &'r str: sqlx::Decode<'r, DB>,
{
    fn decode(value: <DB as sqlx::Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let value = <&str as sqlx::Decode<DB>>::decode(value)?;
        Ok(EvDateTime::from_iso_string(value)?)
    }
}

#[test]
fn test_trimmed_to_sec() {
    let dt = EvDateTime::now().trimmed_to_sec();
    assert_eq!(dt.0.timestamp_subsec_nanos(), 0);
}

#[test]
fn test_parse_evdatetime() {
    for (dtstr, dtstr2) in &[
        ("1970-03-05 14:32:45+00:00", "1970-03-05T14:32:45Z"),
        ("2025-03-05T14:32:45Z", "2025-03-05T14:32:45Z"),
        ("2025-03-05 14:32:45+10:00", "2025-03-05T14:32:45+10:00"),
        ("2025-03-05T14:32:45-01:30", "2025-03-05T14:32:45-01:30"),
        ("2025-03-17T20:45:38.565293063+01:00", "2025-03-17T20:45:38.565+01:00"),
        ("2025-03-17T21:27:04.095+01:00", "2025-03-17T21:27:04.095+01:00"),
    ] {
        let dt = EvDateTime::from_iso_string(dtstr)
            .map_err(|e| println!("parse {dtstr} error: {e}")).unwrap();
        assert_eq!(&dt.to_iso_string(), dtstr2)
    }
}

#[test]
fn test_instant_ordering_across_offsets() {
    let utc = EvDateTime::from_iso_string("2025-01-01T00:00:00Z").unwrap();
    let shifted = EvDateTime::from_iso_string("2025-01-01T05:30:00+05:30").unwrap();
    assert_eq!(utc, shifted);
    let later = EvDateTime::from_iso_string("2025-01-01T00:00:01Z").unwrap();
    assert!(later.0 > utc.0);
}
