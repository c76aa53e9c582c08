use anyhow::anyhow;
use chrono::{
  DateTime,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;

pub const DEFAULT_DISPLAY_TIMEZONE: &str =
  "Asia/Kolkata";
pub const INVALID_DATE_TEXT: &str =
  "Invalid Date";

/// Wall-clock format used by the task
/// form's date/time field.
pub const LOCAL_INPUT_FORMAT: &str =
  "%Y-%m-%dT%H:%M";

const DISPLAY_FORMAT: &str =
  "%d %b %Y, %I:%M %p";

const NAIVE_FORMATS: [&str; 4] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M"
];

/// Resolves a configured zone name,
/// falling back to the default display
/// zone and then UTC.
pub fn resolve_timezone(
  raw: Option<&str>,
  source: &str
) -> Tz {
  if let Some(raw) = raw
    && let Some(tz) =
      parse_timezone(raw, source)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_DISPLAY_TIMEZONE,
    "DEFAULT_DISPLAY_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "resolved timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::warn!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Parses a backend timestamp. Offset-less
/// values are read as UTC.
pub fn parse_instant(
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
    return Some(
      dt.with_timezone(&Utc)
    );
  }

  for format in NAIVE_FORMATS {
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
pub fn format_iso(
  dt: DateTime<Utc>
) -> String {
  dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")
    .to_string()
}

/// Display string for a due date, e.g.
/// `01 Jan 2024, 05:30 AM`.
#[must_use]
pub fn format_due(
  iso: &str,
  tz: Tz
) -> String {
  match parse_instant(iso) {
    | Some(dt) => {
      dt.with_timezone(&tz)
        .format(DISPLAY_FORMAT)
        .to_string()
    }
    | None => {
      INVALID_DATE_TEXT.to_string()
    }
  }
}

/// Renders a stored instant as the
/// viewer's wall-clock input value.
#[must_use]
pub fn to_local_input(
  iso: &str,
  tz: Tz
) -> Option<String> {
  parse_instant(iso).map(|dt| {
    dt.with_timezone(&tz)
      .format(LOCAL_INPUT_FORMAT)
      .to_string()
  })
}

/// Converts a wall-clock input value in
/// the viewer's zone back to a UTC ISO
/// timestamp.
pub fn from_local_input(
  raw: &str,
  tz: Tz
) -> anyhow::Result<String> {
  let trimmed = raw.trim();
  let naive =
    NaiveDateTime::parse_from_str(
      trimmed,
      LOCAL_INPUT_FORMAT
    )
    .or_else(|_| {
      NaiveDateTime::parse_from_str(
        trimmed,
        "%Y-%m-%dT%H:%M:%S"
      )
    })
    .map_err(|err| {
      anyhow!(
        "invalid date/time '{trimmed}' \
         (expected YYYY-MM-DDTHH:MM): \
         {err}"
      )
    })?;

  let utc =
    to_utc_from_local(naive, tz, trimmed)?;
  Ok(format_iso(utc))
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in timezone {tz}: \
         {context}"
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  fn new_york() -> Tz {
    "America/New_York"
      .parse()
      .expect("valid zone")
  }

  #[test]
  fn formats_in_fixed_zone() {
    let tz = resolve_timezone(
      None, "test"
    );
    assert_eq!(
      format_due(
        "2024-01-01T00:00:00Z",
        tz
      ),
      "01 Jan 2024, 05:30 AM"
    );
    assert_eq!(
      format_due(
        "2024-06-15T14:05:00Z",
        tz
      ),
      "15 Jun 2024, 07:35 PM"
    );
  }

  #[test]
  fn invalid_input_formats_as_invalid_date(
  ) {
    assert_eq!(
      format_due(
        "not a date",
        chrono_tz::UTC
      ),
      INVALID_DATE_TEXT
    );
  }

  #[test]
  fn parses_offsets_and_naive_values() {
    let expected = Utc
      .with_ymd_and_hms(
        2024, 3, 5, 10, 0, 0
      )
      .single()
      .expect("valid instant");
    assert_eq!(
      parse_instant(
        "2024-03-05T15:30:00+05:30"
      ),
      Some(expected)
    );
    assert_eq!(
      parse_instant(
        "2024-03-05T10:00:00.000Z"
      ),
      Some(expected)
    );
    assert_eq!(
      parse_instant("2024-03-05T10:00"),
      Some(expected)
    );
  }

  #[test]
  fn local_input_round_trips() {
    let tz = new_york();
    let original =
      "2024-07-04T18:45:00.000Z";
    let local = to_local_input(
      original, tz
    )
    .expect("local value");
    assert_eq!(local, "2024-07-04T14:45");
    let back =
      from_local_input(&local, tz)
        .expect("convert back");
    assert_eq!(back, original);
  }

  #[test]
  fn nonexistent_local_time_is_rejected() {
    let err = from_local_input(
      "2024-03-10T02:30",
      new_york()
    )
    .expect_err("spring-forward gap");
    assert!(
      err
        .to_string()
        .contains("does not exist")
    );
  }

  #[test]
  fn ambiguous_local_time_uses_earliest()
  {
    let iso = from_local_input(
      "2024-11-03T01:30",
      new_york()
    )
    .expect("ambiguous resolves");
    assert_eq!(
      iso,
      "2024-11-03T05:30:00.000Z"
    );
  }

  #[test]
  fn unknown_zone_falls_back_to_default()
  {
    let tz = resolve_timezone(
      Some("Mars/Olympus"),
      "test"
    );
    assert_eq!(
      tz.name(),
      DEFAULT_DISPLAY_TIMEZONE
    );
  }
}
