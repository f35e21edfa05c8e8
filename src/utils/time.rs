use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// The current UTC time as an RFC 3339 string, as stored in `apikeys.json`.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.unix_timestamp().to_string())
}

/// Formats a stored `created` timestamp as `MM/DD HH:MM`.
///
/// Accepts RFC 3339 and offset-less ISO 8601 (older key files); anything else
/// is shown as its first ten characters.
pub fn format_created(created: &str) -> String {
    let short = format_description!("[month]/[day] [hour]:[minute]");
    if let Ok(dt) = OffsetDateTime::parse(created, &Rfc3339)
        && let Ok(s) = dt.format(&short)
    {
        return s;
    }
    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    if let Ok(dt) = PrimitiveDateTime::parse(created, &naive)
        && let Ok(s) = dt.format(&short)
    {
        return s;
    }
    created.chars().take(10).collect()
}
