use chrono::{
  DateTime,
  NaiveDate,
  NaiveDateTime,
  Utc
};

const NAIVE_DATETIME_FORMATS: [&str; 3] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%d %H:%M:%S"
];

/// Parses a server deadline. Accepts
/// RFC 3339, a naive date-time (taken
/// as UTC) or a bare date (midnight
/// UTC).
#[must_use]
pub fn parse_deadline(
  raw: &str
) -> Option<DateTime<Utc>> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Some(dt.with_timezone(&Utc));
  }

  for format in NAIVE_DATETIME_FORMATS {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        trimmed, format
      )
    {
      return Some(naive.and_utc());
    }
  }

  NaiveDate::parse_from_str(
    trimmed, "%Y-%m-%d"
  )
  .ok()
  .and_then(|date| {
    date.and_hms_opt(0, 0, 0)
  })
  .map(|naive| naive.and_utc())
}

#[must_use]
pub fn format_deadline(
  deadline: Option<DateTime<Utc>>
) -> String {
  deadline
    .map(|dt| {
      dt.format("%d.%m.%Y").to_string()
    })
    .unwrap_or_else(|| "-".to_string())
}
