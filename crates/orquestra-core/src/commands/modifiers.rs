use anyhow::anyhow;
use chrono::{
  DateTime,
  Duration,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use tracing::{
  instrument,
  warn
};

use crate::datetime::{
  parse_date_bound,
  parse_date_expr
};
use crate::event::{
  EventTemplate,
  Recurrence,
  WeekdaySet
};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Mod {
  Start(DateTime<Utc>),
  End(DateTime<Utc>),
  Duration(Duration),
  Recur(Recurrence),
  Days(WeekdaySet),
  Until(Option<NaiveDate>),
  Color(Option<String>),
  Location(Option<String>),
  Description(Option<String>)
}

/// Splits `add` arguments into title words
/// and modifiers. Everything after `--` is
/// title text.
#[instrument(skip(args, now, tz))]
pub(super) fn parse_title_and_mods(
  args: &[String],
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<(String, Vec<Mod>)>
{
  let mut title_parts = Vec::new();
  let mut mods = Vec::new();

  let mut literal = false;
  for arg in args {
    if arg == "--" {
      literal = true;
      continue;
    }

    if !literal
      && let Some(one_mod) =
        parse_one_mod(arg, now, tz)?
    {
      mods.push(one_mod);
      continue;
    }

    title_parts.push(arg.clone());
  }

  Ok((title_parts.join(" "), mods))
}

fn optional_text(
  value: &str
) -> Option<String> {
  let value = value.trim();
  (!value.is_empty())
    .then(|| value.to_string())
}

pub(super) fn parse_one_mod(
  tok: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<Option<Mod>> {
  let Some((key, value)) =
    tok.split_once(':')
  else {
    return Ok(None);
  };

  let key = key.to_ascii_lowercase();

  match key.as_str() {
    | "start" => {
      Ok(Some(Mod::Start(
        parse_date_expr(value, now, tz)?
      )))
    }
    | "end" => {
      Ok(Some(Mod::End(
        parse_date_expr(value, now, tz)?
      )))
    }
    | "dur" | "duration" => {
      Ok(Some(Mod::Duration(
        parse_duration(value)?
      )))
    }
    | "recur" | "repeat" => {
      Ok(Some(Mod::Recur(
        value.parse::<Recurrence>()?
      )))
    }
    | "days" => {
      Ok(Some(Mod::Days(
        value.parse::<WeekdaySet>()?
      )))
    }
    | "until" => {
      let until = if value.trim().is_empty()
      {
        None
      } else {
        Some(parse_date_bound(
          value, now, tz
        )?)
      };
      Ok(Some(Mod::Until(until)))
    }
    | "color" => {
      Ok(Some(Mod::Color(optional_text(
        value
      ))))
    }
    | "at" | "where" => {
      Ok(Some(Mod::Location(
        optional_text(value)
      )))
    }
    | "desc" => {
      Ok(Some(Mod::Description(
        optional_text(value)
      )))
    }
    | _ => Ok(None)
  }
}

/// `90m`, `2h`, `1d`, or bare minutes.
pub(super) fn parse_duration(
  raw: &str
) -> anyhow::Result<Duration> {
  let raw = raw.trim().to_ascii_lowercase();
  let (number, unit) = match raw
    .char_indices()
    .last()
  {
    | Some((idx, 'm' | 'h' | 'd')) => {
      raw.split_at(idx)
    }
    | _ => (raw.as_str(), "m")
  };
  let amount: i64 =
    number.parse().map_err(|_| {
      anyhow!("invalid duration: {raw}")
    })?;
  if amount <= 0 {
    return Err(anyhow!(
      "duration must be positive: {raw}"
    ));
  }
  match unit {
    | "h" => Duration::try_hours(amount),
    | "d" => Duration::try_days(amount),
    | _ => Duration::try_minutes(amount)
  }
  .ok_or_else(|| {
    anyhow!("duration out of range: {raw}")
  })
}

/// Applies modifiers in one pass. A new
/// start keeps the current duration unless
/// `end:` or `dur:` says otherwise.
pub(super) fn apply_mods(
  event: &mut EventTemplate,
  mods: &[Mod]
) -> anyhow::Result<()> {
  let duration = event.duration();
  let mut end = None;
  let mut span = None;

  for one_mod in mods {
    match one_mod {
      | Mod::Start(dt) => {
        event.start = *dt;
      }
      | Mod::End(dt) => {
        end = Some(*dt);
      }
      | Mod::Duration(d) => {
        span = Some(*d);
      }
      | Mod::Recur(kind) => {
        event.recurrence = *kind;
      }
      | Mod::Days(days) => {
        event.weekdays = days.clone();
      }
      | Mod::Until(until) => {
        event.recurrence_until = *until;
      }
      | Mod::Color(color) => {
        event.color = color.clone();
      }
      | Mod::Location(location) => {
        event.location = location.clone();
      }
      | Mod::Description(text) => {
        event.description = text.clone();
      }
    }
  }

  if end.is_some() && span.is_some() {
    warn!(
      "both end: and dur: given; end: \
       wins"
    );
  }
  event.end = match end {
    | Some(end) => end,
    | None => {
      event
        .start
        .checked_add_signed(
          span.unwrap_or(duration)
        )
        .ok_or_else(|| {
          anyhow!(
            "event end falls outside the \
             supported date range"
          )
        })?
    }
  };

  if event.recurrence == Recurrence::None
    && !event.weekdays.is_empty()
    && mods
      .iter()
      .any(|m| matches!(m, Mod::Days(_)))
  {
    event.recurrence =
      Recurrence::SpecificWeekdays;
  }

  Ok(())
}
