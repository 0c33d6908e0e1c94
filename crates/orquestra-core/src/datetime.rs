use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeDelta,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

const DATE_EXPR_FORMATS: &str =
  "supported formats: \
   now/today/tomorrow/yesterday, \
   weekday names (e.g. monday or seg), \
   clock times (e.g. 3:23pm or 15:23), \
   +N/-N with unit m/h/d/w, RFC3339, \
   YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
   YYYY-MM-DD HH:MM";

static OFFSET_PATTERN: OnceLock<Regex> =
  OnceLock::new();
static CLOCK_PATTERN: OnceLock<Regex> =
  OnceLock::new();

fn compiled(
  cell: &'static OnceLock<Regex>,
  source: &str
) -> anyhow::Result<&'static Regex> {
  if let Some(re) = cell.get() {
    return Ok(re);
  }
  let re = Regex::new(source)
    .context("invalid built-in pattern")?;
  Ok(cell.get_or_init(|| re))
}

#[must_use]
pub fn to_local_date(
  dt: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  dt.with_timezone(tz).date_naive()
}

/// `YYYY-MM-DD HH:MM` wall-clock text in
/// `tz`.
#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

/// Converts a wall-clock time to an
/// instant. Ambiguous times resolve to
/// the earliest instant; times inside a
/// DST gap move forward one hour.
pub fn local_to_utc(
  tz: &Tz,
  local_naive: NaiveDateTime
) -> DateTime<Utc> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      local_dt.with_timezone(&Utc)
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => first.min(second).with_timezone(&Utc),
    | LocalResult::None => {
      let shifted = local_naive
        .checked_add_signed(TimeDelta::hours(1))
        .unwrap_or(local_naive);
      tracing::trace!(
        local = %local_naive,
        shifted = %shifted,
        "local time falls in a DST gap"
      );
      tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
          Utc.from_utc_datetime(
            &local_naive
          )
        })
    }
  }
}

#[must_use]
pub fn start_of_day(
  date: NaiveDate,
  tz: &Tz
) -> DateTime<Utc> {
  local_to_utc(
    tz,
    date.and_time(NaiveTime::MIN)
  )
}

/// Last millisecond of `date` in `tz`.
#[must_use]
pub fn end_of_day(
  date: NaiveDate,
  tz: &Tz
) -> DateTime<Utc> {
  let next = start_of_day(
    add_days(date, 1),
    tz
  );
  next
    .checked_sub_signed(
      TimeDelta::milliseconds(1)
    )
    .unwrap_or(next)
}

/// Moves `date` by `days`, staying put
/// when the result leaves the calendar.
#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  TimeDelta::try_days(days)
    .and_then(|delta| {
      date.checked_add_signed(delta)
    })
    .unwrap_or(date)
}

#[must_use]
pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

#[must_use]
pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

/// Moves `date` by whole months, clamping
/// the day to the length of the target
/// month (Jan 31 + 1 month = Feb 28/29).
#[must_use]
pub fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let mut year = date.year();
  let mut month =
    date.month() as i32 + months;

  while month < 1 {
    month += 12;
    year = year.saturating_sub(1);
  }
  while month > 12 {
    month -= 12;
    year = year.saturating_add(1);
  }

  let month = month as u32;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

/// A parsed date expression, resolved
/// against a reference instant and zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateExpr {
  Now,
  DayOffset(i64),
  Next(Weekday),
  Clock(NaiveTime),
  Offset(TimeDelta),
  Instant(DateTime<Utc>),
  Date(NaiveDate),
  Local(NaiveDateTime)
}

impl DateExpr {
  fn parse(
    token: &str
  ) -> anyhow::Result<Option<Self>> {
    let lower = token.to_ascii_lowercase();
    let keyword = match lower.as_str() {
      | "now" => Some(Self::Now),
      | "today" => Some(Self::DayOffset(0)),
      | "tomorrow" => {
        Some(Self::DayOffset(1))
      }
      | "yesterday" => {
        Some(Self::DayOffset(-1))
      }
      | _ => None
    };
    if keyword.is_some() {
      return Ok(keyword);
    }

    if let Some(weekday) =
      parse_weekday_name(&lower)
    {
      return Ok(Some(Self::Next(weekday)));
    }
    if let Some(time) =
      parse_clock_time(token)
    {
      return Ok(Some(Self::Clock(time)));
    }
    if let Some(delta) =
      parse_offset(token)?
    {
      return Ok(Some(Self::Offset(delta)));
    }
    if let Ok(dt) =
      DateTime::parse_from_rfc3339(token)
    {
      return Ok(Some(Self::Instant(
        dt.with_timezone(&Utc)
      )));
    }
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, "%Y-%m-%d"
      )
    {
      return Ok(Some(Self::Date(date)));
    }
    let local = ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
      .iter()
      .find_map(|fmt| {
        NaiveDateTime::parse_from_str(
          token, fmt
        )
        .ok()
      });
    Ok(local.map(Self::Local))
  }

  fn resolve(
    self,
    now: DateTime<Utc>,
    tz: &Tz
  ) -> anyhow::Result<DateTime<Utc>> {
    let today = to_local_date(now, tz);
    let resolved = match self {
      | Self::Now => now,
      | Self::DayOffset(days) => {
        start_of_day(
          add_days(today, days),
          tz
        )
      }
      | Self::Next(weekday) => {
        start_of_day(
          next_weekday_date(today, weekday),
          tz
        )
      }
      | Self::Clock(time) => {
        let day = if today.and_time(time)
          <= now.with_timezone(tz).naive_local()
        {
          add_days(today, 1)
        } else {
          today
        };
        local_to_utc(tz, day.and_time(time))
      }
      | Self::Offset(delta) => {
        now.checked_add_signed(delta).ok_or_else(
          || {
            anyhow!(
              "relative offset leaves the \
               supported date range"
            )
          }
        )?
      }
      | Self::Instant(dt) => dt,
      | Self::Date(date) => {
        start_of_day(date, tz)
      }
      | Self::Local(ndt) => {
        local_to_utc(tz, ndt)
      }
    };
    Ok(resolved)
  }
}

/// `+90m`, `-2h`, `+3d`, `+1w`.
fn parse_offset(
  token: &str
) -> anyhow::Result<Option<TimeDelta>> {
  let re = compiled(
    &OFFSET_PATTERN,
    r"^(?P<sign>[+-])(?P<amount>\d+)(?P<unit>[mhdw])$"
  )?;
  let Some(caps) = re.captures(token) else {
    return Ok(None);
  };

  let amount: i64 = caps["amount"]
    .parse()
    .with_context(|| {
      format!(
        "relative amount too large: \
         {token}"
      )
    })?;
  let delta = match &caps["unit"] {
    | "m" => TimeDelta::try_minutes(amount),
    | "h" => TimeDelta::try_hours(amount),
    | "d" => TimeDelta::try_days(amount),
    | _ => TimeDelta::try_weeks(amount)
  }
  .ok_or_else(|| {
    anyhow!(
      "relative offset out of range: \
       {token}"
    )
  })?;

  Ok(Some(if &caps["sign"] == "-" {
    -delta
  } else {
    delta
  }))
}

/// Resolves a date expression to an
/// instant, reading wall-clock forms in
/// `tz`.
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  match DateExpr::parse(token)? {
    | Some(expr) => expr.resolve(now, tz),
    | None => {
      Err(anyhow!(
        "unrecognized date expression: \
         {input}"
      ))
      .context(DATE_EXPR_FORMATS)
    }
  }
}

/// Parses a calendar date bound. Plain
/// `YYYY-MM-DD` is taken as is; any other
/// expression is reduced to its local
/// date.
pub fn parse_date_bound(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<NaiveDate> {
  if let Ok(date) =
    NaiveDate::parse_from_str(
      input.trim(),
      "%Y-%m-%d"
    )
  {
    return Ok(date);
  }
  let instant =
    parse_date_expr(input, now, tz)?;
  Ok(to_local_date(instant, tz))
}

/// English or Portuguese weekday name,
/// full or abbreviated, lowercase.
pub fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  let weekday = match token.trim() {
    | "monday" | "mon" | "seg"
    | "segunda" => Weekday::Mon,
    | "tuesday" | "tue" | "tues"
    | "ter" | "terca" | "terça" => {
      Weekday::Tue
    }
    | "wednesday" | "wed" | "qua"
    | "quarta" => Weekday::Wed,
    | "thursday" | "thu" | "thur"
    | "thurs" | "qui" | "quinta" => {
      Weekday::Thu
    }
    | "friday" | "fri" | "sex"
    | "sexta" => Weekday::Fri,
    | "saturday" | "sat" | "sab"
    | "sáb" | "sabado" | "sábado" => {
      Weekday::Sat
    }
    | "sunday" | "sun" | "dom"
    | "domingo" => Weekday::Sun,
    | _ => return None
  };
  Some(weekday)
}

/// Strictly after `from`: asking for
/// today's weekday yields next week.
fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let ahead = (7
    + target.num_days_from_monday()
    - from.weekday().num_days_from_monday())
    % 7;
  add_days(
    from,
    if ahead == 0 { 7 } else { i64::from(ahead) }
  )
}

/// Accepts `15:23`, `9:05` and
/// `3:23pm`-style clock times.
pub fn parse_clock_time(
  token: &str
) -> Option<NaiveTime> {
  let re = compiled(
    &CLOCK_PATTERN,
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<half>[ap]m)?$"
  )
  .ok()?;
  let caps = re.captures(token.trim())?;
  let hour: u32 = caps["hour"].parse().ok()?;
  let minute: u32 =
    caps["minute"].parse().ok()?;

  let hour = match caps
    .name("half")
    .map(|m| m.as_str().to_ascii_lowercase())
  {
    | None => hour,
    | Some(_) if !(1..=12).contains(&hour) => {
      return None;
    }
    | Some(half) => {
      (hour % 12)
        + if half == "pm" { 12 } else { 0 }
    }
  };

  NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    end_of_day,
    local_to_utc,
    parse_clock_time,
    parse_date_bound,
    parse_date_expr,
    shift_months,
    to_local_date
  };

  fn now() -> chrono::DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_weekday_name() {
    let parsed = parse_date_expr(
      "wednesday",
      now(),
      &chrono_tz::UTC
    )
    .expect("parse weekday");
    assert_eq!(
      to_local_date(
        parsed,
        &chrono_tz::UTC
      ),
      date(2026, 2, 18)
    );

    // 2026-02-17 is a Tuesday.
    let parsed = parse_date_expr(
      "ter",
      now(),
      &chrono_tz::UTC
    )
    .expect("parse portuguese weekday");
    assert_eq!(
      to_local_date(
        parsed,
        &chrono_tz::UTC
      ),
      date(2026, 2, 24)
    );
  }

  #[test]
  fn parses_clock_time_rolling_to_tomorrow()
  {
    let parsed = parse_date_expr(
      "9:30am",
      now(),
      &chrono_tz::UTC
    )
    .expect("parse clock time");
    assert_eq!(
      parsed
        .format("%Y-%m-%d %H:%M")
        .to_string(),
      "2026-02-18 09:30"
    );
  }

  #[test]
  fn clock_time_forms() {
    let hm = |h, m| {
      chrono::NaiveTime::from_hms_opt(h, m, 0)
    };
    assert_eq!(parse_clock_time("12:15am"), hm(0, 15));
    assert_eq!(parse_clock_time("12:00PM"), hm(12, 0));
    assert_eq!(parse_clock_time("3:23pm"), hm(15, 23));
    assert_eq!(parse_clock_time("23:59"), hm(23, 59));
    assert_eq!(parse_clock_time("13:00pm"), None);
    assert_eq!(parse_clock_time("24:00"), None);
    assert_eq!(parse_clock_time("9:60"), None);
  }

  #[test]
  fn relative_offsets_move_from_now() {
    let parsed = parse_date_expr(
      "-90m",
      now(),
      &chrono_tz::UTC
    )
    .expect("parse minutes");
    assert_eq!(
      parsed.to_rfc3339(),
      "2026-02-17T10:30:00+00:00"
    );
    let parsed = parse_date_expr(
      "+2w",
      now(),
      &chrono_tz::UTC
    )
    .expect("parse weeks");
    assert_eq!(
      parsed.to_rfc3339(),
      "2026-03-03T12:00:00+00:00"
    );
  }

  #[test]
  fn oversized_offsets_are_errors() {
    for input in [
      "+99999999999999d",
      "-99999999999999d",
      "+99999999999999h",
      "+999999999999999999999m",
      "+9999999999w"
    ] {
      assert!(
        parse_date_expr(
          input,
          now(),
          &chrono_tz::UTC
        )
        .is_err(),
        "{input} should be rejected"
      );
    }
    assert!(
      parse_date_bound(
        "+99999999999999d",
        now(),
        &chrono_tz::UTC
      )
      .is_err()
    );
  }

  #[test]
  fn unknown_expression_lists_formats() {
    let err = parse_date_expr(
      "next blue moon",
      now(),
      &chrono_tz::UTC
    )
    .expect_err("unknown expression");
    assert!(
      format!("{err:#}")
        .contains("supported formats")
    );
  }

  #[test]
  fn parses_local_datetime_in_zone() {
    let tz = chrono_tz::America::Sao_Paulo;
    let parsed = parse_date_expr(
      "2026-03-10T09:00",
      now(),
      &tz
    )
    .expect("parse local datetime");
    assert_eq!(
      parsed.to_rfc3339(),
      "2026-03-10T12:00:00+00:00"
    );
  }

  #[test]
  fn date_bound_keeps_plain_dates() {
    let bound = parse_date_bound(
      "2024-01-05",
      now(),
      &chrono_tz::Asia::Tokyo
    )
    .expect("parse bound");
    assert_eq!(bound, date(2024, 1, 5));
  }

  #[test]
  fn shift_months_clamps_day() {
    assert_eq!(
      shift_months(date(2024, 1, 31), 1),
      date(2024, 2, 29)
    );
    assert_eq!(
      shift_months(date(2023, 1, 31), 1),
      date(2023, 2, 28)
    );
    assert_eq!(
      shift_months(date(2024, 1, 31), 3),
      date(2024, 4, 30)
    );
    assert_eq!(
      shift_months(date(2024, 11, 15), 2),
      date(2025, 1, 15)
    );
  }

  #[test]
  fn dst_gap_moves_forward() {
    let tz = chrono_tz::America::New_York;
    let gap = date(2024, 3, 10)
      .and_hms_opt(2, 30, 0)
      .expect("valid time");
    let resolved = local_to_utc(&tz, gap);
    assert_eq!(
      resolved.to_rfc3339(),
      "2024-03-10T07:30:00+00:00"
    );
  }

  #[test]
  fn end_of_day_is_last_millisecond() {
    let end = end_of_day(
      date(2024, 1, 5),
      &chrono_tz::UTC
    );
    assert_eq!(
      end.to_rfc3339_opts(
        chrono::SecondsFormat::Millis,
        true
      ),
      "2024-01-05T23:59:59.999Z"
    );
  }
}

/// Serde helpers for inclusive date
/// bounds persisted as `YYYY-MM-DD`.
pub mod date_bound_serde {
  use chrono::{
    DateTime,
    NaiveDate
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    date: &Option<NaiveDate>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match date {
      | Some(value) => {
        serializer.serialize_str(
          &value
            .format("%Y-%m-%d")
            .to_string()
        )
      }
      | None => serializer.serialize_none()
    }
  }

  /// Accepts `YYYY-MM-DD`, an RFC 3339
  /// timestamp (reduced to the date in
  /// its own offset), an empty string or
  /// `null`.
  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<Option<NaiveDate>, D::Error>
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    let Some(raw) = opt else {
      return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return Ok(None);
    }
    if let Ok(date) =
      NaiveDate::parse_from_str(
        trimmed, "%Y-%m-%d"
      )
    {
      return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(trimmed)
      .map(|dt| Some(dt.date_naive()))
      .map_err(serde::de::Error::custom)
  }
}
