use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  TimeDelta,
  Utc
};
use chrono_tz::Tz;

use crate::datetime::{
  add_days,
  end_of_day,
  first_day_of_month,
  last_day_of_month,
  shift_months,
  start_of_day,
  to_local_date
};
use crate::event::{
  EventInstance,
  EventTemplate
};
use crate::recurrence::{
  Window,
  instance_template_id
};

pub const DEFAULT_CALENDAR_MAX_OCCURRENCES:
  usize = 365;
pub const DEFAULT_UPCOMING_MAX_OCCURRENCES:
  usize = 100;
pub const DEFAULT_UPCOMING_DAYS: i64 = 30;
pub const DEFAULT_UPCOMING_LIMIT: usize =
  5;
pub const DEFAULT_CALENDAR_DOTS: usize = 3;

/// One day of the month grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
  pub date:     NaiveDate,
  pub count:    usize,
  pub colors:   Vec<String>,
  pub is_today: bool
}

/// Calendar page window: the first day of
/// the previous month through the last
/// instant of the next month.
pub fn month_window(
  focus: NaiveDate,
  tz: &Tz
) -> Window {
  let previous = shift_months(
    first_day_of_month(
      focus.year(),
      focus.month()
    ),
    -1
  );
  let next = shift_months(
    first_day_of_month(
      focus.year(),
      focus.month()
    ),
    1
  );
  Window::new(
    start_of_day(previous, tz),
    end_of_day(
      last_day_of_month(
        next.year(),
        next.month()
      ),
      tz
    )
  )
}

/// Dashboard preview window: start of
/// today through `now + days`, saturating
/// at the end of the representable range.
pub fn upcoming_window(
  now: DateTime<Utc>,
  days: i64,
  tz: &Tz
) -> Window {
  Window::new(
    start_of_day(
      to_local_date(now, tz),
      tz
    ),
    TimeDelta::try_days(days)
      .and_then(|delta| {
        now.checked_add_signed(delta)
      })
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
  )
}

fn sorted_by_start(
  mut instances: Vec<EventInstance>
) -> Vec<EventInstance> {
  instances.sort_by(|a, b| {
    a.start()
      .cmp(&b.start())
      .then_with(|| a.id().cmp(b.id()))
  });
  instances
}

pub fn events_on_day(
  instances: &[EventInstance],
  day: NaiveDate,
  tz: &Tz
) -> Vec<EventInstance> {
  sorted_by_start(
    instances
      .iter()
      .filter(|i| {
        to_local_date(i.start(), tz) == day
      })
      .cloned()
      .collect()
  )
}

#[tracing::instrument(skip(instances, tz))]
pub fn month_grid(
  instances: &[EventInstance],
  focus: NaiveDate,
  today: NaiveDate,
  tz: &Tz,
  max_dots: usize
) -> Vec<DayCell> {
  let first = first_day_of_month(
    focus.year(),
    focus.month()
  );
  let last = last_day_of_month(
    focus.year(),
    focus.month()
  );

  let mut cells = Vec::new();
  let mut date = first;
  while date <= last {
    let day_events =
      events_on_day(instances, date, tz);
    cells.push(DayCell {
      date,
      count: day_events.len(),
      colors: day_events
        .iter()
        .take(max_dots)
        .map(|i| i.color().to_string())
        .collect(),
      is_today: date == today
    });
    date = add_days(date, 1);
  }

  tracing::debug!(
    days = cells.len(),
    busy_days = cells
      .iter()
      .filter(|c| c.count > 0)
      .count(),
    "built month grid"
  );
  cells
}

/// Instances starting today or later,
/// soonest first, truncated to `limit`.
pub fn upcoming(
  instances: &[EventInstance],
  now: DateTime<Utc>,
  tz: &Tz,
  limit: usize
) -> Vec<EventInstance> {
  let today_start = start_of_day(
    to_local_date(now, tz),
    tz
  );
  let mut out = sorted_by_start(
    instances
      .iter()
      .filter(|i| i.start() >= today_start)
      .cloned()
      .collect()
  );
  out.truncate(limit);
  out
}

/// The template an edit or delete of
/// `instance` must target.
pub fn resolve_edit_target<'a>(
  instance: &EventInstance,
  templates: &'a [EventTemplate]
) -> Option<&'a EventTemplate> {
  let target = if instance.is_recurring {
    instance.original_id.as_str()
  } else {
    instance.id()
  };
  templates.iter().find(|t| t.id == target)
}

/// Maps a template id or a synthetic
/// occurrence id to the stored template.
pub fn resolve_template<'a>(
  id: &str,
  templates: &'a [EventTemplate]
) -> Option<&'a EventTemplate> {
  let id = id.trim();
  if let Some(found) =
    templates.iter().find(|t| t.id == id)
  {
    return Some(found);
  }
  let original = instance_template_id(id)?;
  templates
    .iter()
    .find(|t| t.id == original)
}
