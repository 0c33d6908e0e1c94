use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  instrument
};

use super::find_template;
use crate::agenda;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{
  add_days,
  end_of_day,
  parse_date_bound,
  start_of_day,
  to_local_date
};
use crate::event::{
  EventInstance,
  EventTemplate
};
use crate::recurrence::{
  Window,
  expand
};
use crate::render::Renderer;

const INFO_PREVIEW_DAYS: i64 = 365;
const INFO_PREVIEW_COUNT: usize = 3;

#[instrument(skip(store, renderer))]
pub(super) fn cmd_list(
  store: &mut DataStore,
  renderer: &mut Renderer
) -> anyhow::Result<()> {
  info!("command list");

  let mut events = store.load_events()?;
  if events.is_empty() {
    println!("No events.");
    return Ok(());
  }
  events.sort_by(|a, b| {
    a.start
      .cmp(&b.start)
      .then_with(|| a.id.cmp(&b.id))
  });
  renderer.print_event_table(&events)
}

#[instrument(skip(
  store, cfg, renderer, args, now, tz
))]
pub(super) fn cmd_info(
  store: &mut DataStore,
  cfg: &Config,
  renderer: &mut Renderer,
  args: &[String],
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command info");

  let id = args.first().ok_or_else(|| {
    anyhow!("info: event id required")
  })?;
  let events = store.load_events()?;
  let event = find_template(id, &events)?;
  renderer.print_event_info(event)?;

  let next = info_preview(
    event,
    now,
    tz,
    cfg.calendar.max_occurrences
  );
  if !next.is_empty() {
    println!();
    renderer.print_instances(&next)?;
  }

  Ok(())
}

/// Next few occurrences of a series, under
/// the same occurrence cap as the calendar.
fn info_preview(
  event: &EventTemplate,
  now: DateTime<Utc>,
  tz: &Tz,
  max_occurrences: usize
) -> Vec<EventInstance> {
  if !event.recurrence.is_recurring() {
    return Vec::new();
  }
  let window = agenda::upcoming_window(
    now,
    INFO_PREVIEW_DAYS,
    tz
  );
  let mut next = expand(
    std::slice::from_ref(event),
    window,
    max_occurrences,
    tz
  );
  next.truncate(INFO_PREVIEW_COUNT);
  next
}

fn parse_focus_month(
  raw: &str
) -> anyhow::Result<NaiveDate> {
  NaiveDate::parse_from_str(
    &format!("{}-01", raw.trim()),
    "%Y-%m-%d"
  )
  .with_context(|| {
    format!(
      "invalid month (expected \
       YYYY-MM): {raw}"
    )
  })
}

#[instrument(skip(
  store, cfg, renderer, args, now, tz
))]
pub(super) fn cmd_month(
  store: &mut DataStore,
  cfg: &Config,
  renderer: &mut Renderer,
  args: &[String],
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command month");

  let today = to_local_date(now, tz);
  let focus = match args.first() {
    | Some(raw) => parse_focus_month(raw)?,
    | None => today
  };
  let max_occurrences = cfg.calendar.max_occurrences;
  let dots = cfg.calendar.dots;

  let events = store.load_events()?;
  let window =
    agenda::month_window(focus, tz);
  let instances = expand(
    &events,
    window,
    max_occurrences,
    tz
  );
  let cells = agenda::month_grid(
    &instances, focus, today, tz, dots
  );
  debug!(
    instances = instances.len(),
    "month expanded"
  );

  renderer.print_month_grid(focus, &cells)
}

#[instrument(skip(
  store, cfg, renderer, args, now, tz
))]
pub(super) fn cmd_day(
  store: &mut DataStore,
  cfg: &Config,
  renderer: &mut Renderer,
  args: &[String],
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command day");

  let day = match args.first() {
    | Some(raw) => {
      parse_date_bound(raw, now, tz)?
    }
    | None => to_local_date(now, tz)
  };
  let max_occurrences = cfg.calendar.max_occurrences;

  let events = store.load_events()?;
  let window = Window::new(
    start_of_day(day, tz),
    end_of_day(day, tz)
  );
  let instances = expand(
    &events,
    window,
    max_occurrences,
    tz
  );
  let rows =
    agenda::events_on_day(&instances, day, tz);

  if rows.is_empty() {
    println!("No events on {day}.");
    return Ok(());
  }
  renderer.print_instances(&rows)
}

#[instrument(skip(
  store, cfg, renderer, now, tz
))]
pub(super) fn cmd_upcoming(
  store: &mut DataStore,
  cfg: &Config,
  renderer: &mut Renderer,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command upcoming");

  let days = cfg.upcoming.days;
  let max_occurrences = cfg.upcoming.max_occurrences;
  let limit = cfg.upcoming.limit;

  let events = store.load_events()?;
  let window =
    agenda::upcoming_window(now, days, tz);
  let instances = expand(
    &events,
    window,
    max_occurrences,
    tz
  );
  let rows = agenda::upcoming(
    &instances, now, tz, limit
  );

  if rows.is_empty() {
    println!(
      "No events in the next {days} \
       days."
    );
    return Ok(());
  }
  renderer.print_instances(&rows)
}

/// Expanded occurrences between `from:`
/// and `to:` (inclusive local dates) as a
/// JSON array.
#[instrument(skip(
  store, cfg, args, now, tz
))]
pub(super) fn cmd_export(
  store: &mut DataStore,
  cfg: &Config,
  args: &[String],
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command export");

  let days = cfg.upcoming.days;
  let max_occurrences = cfg.calendar.max_occurrences;

  let mut from = to_local_date(now, tz);
  let mut to = None;
  for arg in args {
    match arg.split_once(':') {
      | Some(("from", value)) => {
        from =
          parse_date_bound(value, now, tz)?;
      }
      | Some(("to", value)) => {
        to = Some(parse_date_bound(
          value, now, tz
        )?);
      }
      | _ => {
        return Err(anyhow!(
          "export: unexpected argument \
           {arg} (use from:<date> \
           to:<date>)"
        ));
      }
    }
  }
  let to =
    to.unwrap_or_else(|| add_days(from, days));

  let events = store.load_events()?;
  let window = Window::new(
    start_of_day(from, tz),
    end_of_day(to, tz)
  );
  let instances = expand(
    &events,
    window,
    max_occurrences,
    tz
  );

  let out =
    serde_json::to_string(&instances)?;
  println!("{out}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeDelta,
    TimeZone,
    Utc
  };

  use super::{
    info_preview,
    parse_focus_month
  };
  use crate::config::Config;
  use crate::event::{
    EventTemplate,
    Recurrence
  };

  #[test]
  fn info_preview_uses_the_configured_occurrence_cap()
  {
    let tz = chrono_tz::UTC;
    let start = Utc
      .with_ymd_and_hms(2023, 1, 1, 9, 0, 0)
      .single()
      .expect("valid start");
    let mut event = EventTemplate::new(
      "Journal".to_string(),
      start,
      start + TimeDelta::minutes(30)
    );
    event.recurrence = Recurrence::Daily;
    // 517 daily steps after the anchor.
    let now = Utc
      .with_ymd_and_hms(2024, 6, 1, 8, 0, 0)
      .single()
      .expect("valid now");

    let mut cfg = Config::default();
    assert!(
      info_preview(
        &event,
        now,
        &tz,
        cfg.calendar.max_occurrences
      )
      .is_empty()
    );

    cfg
      .set("calendar.max_occurrences", "1000")
      .expect("set cap");
    let next = info_preview(
      &event,
      now,
      &tz,
      cfg.calendar.max_occurrences
    );
    assert_eq!(next.len(), 3);
    assert_eq!(
      next[0].start(),
      Utc
        .with_ymd_and_hms(2024, 6, 1, 9, 0, 0)
        .single()
        .expect("first preview")
    );

    event.recurrence = Recurrence::None;
    assert!(
      info_preview(&event, now, &tz, 1000)
        .is_empty()
    );
  }

  #[test]
  fn focus_month_parses_year_and_month() {
    let focus = parse_focus_month("2024-02")
      .expect("focus");
    assert_eq!(focus.to_string(), "2024-02-01");
    assert!(parse_focus_month("2024-13").is_err());
    assert!(parse_focus_month("feb").is_err());
  }
}
