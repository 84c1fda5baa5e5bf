use chrono::{DateTime, NaiveTime, Utc};

use super::types::SchedulerError;

pub(crate) fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn format_optional_datetime(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub(crate) fn parse_datetime(value: &str) -> Result<DateTime<Utc>, SchedulerError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(crate) fn parse_optional_datetime(
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, SchedulerError> {
    match value {
        Some(raw) => Ok(Some(parse_datetime(raw)?)),
        None => Ok(None),
    }
}

pub(crate) fn format_time(value: NaiveTime) -> String {
    value.format("%H:%M:%S").to_string()
}

pub(crate) fn parse_time(value: &str) -> Result<NaiveTime, SchedulerError> {
    Ok(NaiveTime::parse_from_str(value, "%H:%M:%S")?)
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
