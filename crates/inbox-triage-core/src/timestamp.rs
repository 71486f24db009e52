//! Timestamp (de)serialization for record arrival times.
//!
//! Output is always RFC 3339. Input additionally accepts naive `YYYY-MM-DDTHH:MM:SS` and
//! `YYYY-MM-DD HH:MM:SS` forms (optionally with fractional seconds) and bare dates, all read as
//! UTC. Spreadsheet date cells get a wider set of forms through [`parse_dataset_date`].

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::TriageError;

/// Parse a timestamp in any accepted input form.
///
/// # Errors
/// Returns [`TriageError::Validation`] when the value matches none of the accepted forms.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, TriageError> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed);
    }

    let with_t = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    if let Ok(parsed) = PrimitiveDateTime::parse(value, with_t) {
        return Ok(parsed.assume_utc());
    }
    let with_space = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    if let Ok(parsed) = PrimitiveDateTime::parse(value, with_space) {
        return Ok(parsed.assume_utc());
    }

    if let Ok(date) = Date::parse(value, format_description!("[year]-[month]-[day]")) {
        return Ok(date.midnight().assume_utc());
    }

    Err(TriageError::Validation(format!("unrecognized timestamp `{value}`")))
}

/// Read the date cell of a spreadsheet export.
///
/// Anything [`parse_timestamp`] accepts comes first. After that, day-first forms win over
/// month-first ones: `d/m/yyyy H:MM`, `m/d/yyyy H:MM`, `d-Mon-yyyy`, `d/m/yyyy`, `m/d/yyyy`.
/// All are read as UTC.
#[must_use]
pub fn parse_dataset_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = parse_timestamp(value) {
        return Some(parsed);
    }

    let day_first_time = format_description!(
        "[day padding:none]/[month padding:none]/[year] [hour padding:none]:[minute]"
    );
    if let Ok(parsed) = PrimitiveDateTime::parse(value, day_first_time) {
        return Some(parsed.assume_utc());
    }
    let month_first_time = format_description!(
        "[month padding:none]/[day padding:none]/[year] [hour padding:none]:[minute]"
    );
    if let Ok(parsed) = PrimitiveDateTime::parse(value, month_first_time) {
        return Some(parsed.assume_utc());
    }

    let named_month =
        format_description!("[day padding:none]-[month repr:short case_sensitive:false]-[year]");
    if let Ok(date) = Date::parse(value, named_month) {
        return Some(date.midnight().assume_utc());
    }
    let day_first = format_description!("[day padding:none]/[month padding:none]/[year]");
    if let Ok(date) = Date::parse(value, day_first) {
        return Some(date.midnight().assume_utc());
    }
    let month_first = format_description!("[month padding:none]/[day padding:none]/[year]");
    Date::parse(value, month_first).ok().map(|date| date.midnight().assume_utc())
}

/// Render a timestamp as RFC 3339.
///
/// # Errors
/// Returns [`TriageError::Validation`] if the value cannot be represented (years outside
/// 0..=9999).
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, TriageError> {
    value
        .format(&Rfc3339)
        .map_err(|err| TriageError::Validation(format!("failed to format timestamp: {err}")))
}

/// `#[serde(with = "timestamp")]` entry point.
///
/// # Errors
/// Propagates formatting failures as serializer errors.
pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let formatted = format_timestamp(*value).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

/// `#[serde(with = "timestamp")]` entry point.
///
/// # Errors
/// Fails when the input is not a string in one of the accepted forms.
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}
