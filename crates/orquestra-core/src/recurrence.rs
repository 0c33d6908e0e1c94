//! Materializes event templates into the
//! concrete occurrences that fall inside a
//! window.
//!
//! Occurrence `k` of a series is computed
//! from the template's first start in
//! project-local wall-clock time, so a
//! daily 09:00 event stays at 09:00 across
//! DST changes and a monthly series
//! anchored on the 31st returns to the 31st
//! after clamping in shorter months.

use chrono::{
  DateTime,
  Duration,
  NaiveDateTime,
  TimeDelta,
  Utc
};
use chrono_tz::Tz;
use tracing::{
  debug,
  trace,
  warn
};

use crate::datetime::{
  end_of_day,
  local_to_utc,
  shift_months
};
use crate::event::{
  EventInstance,
  EventTemplate,
  Recurrence
};

/// Inclusive range of instants to
/// materialize.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Window {
  pub start: DateTime<Utc>,
  pub end:   DateTime<Utc>
}

impl Window {
  pub fn new(
    start: DateTime<Utc>,
    end: DateTime<Utc>
  ) -> Self {
    Self { start, end }
  }

  pub fn is_empty(&self) -> bool {
    self.start > self.end
  }

  pub fn contains(
    &self,
    instant: DateTime<Utc>
  ) -> bool {
    instant >= self.start
      && instant <= self.end
  }
}

/// Expands every template into the
/// instances that start inside `window`.
///
/// Each recurring template walks at most
/// `max_occurrences` steps from its own
/// first occurrence; steps filtered out
/// by weekday or by the window still
/// count. Output order follows input
/// order, then occurrence order.
#[tracing::instrument(
  skip(templates, tz),
  fields(
    templates = templates.len(),
    start = %window.start,
    end = %window.end
  )
)]
pub fn expand(
  templates: &[EventTemplate],
  window: Window,
  max_occurrences: usize,
  tz: &Tz
) -> Vec<EventInstance> {
  if window.is_empty() {
    debug!("window start is after its end; nothing to expand");
    return Vec::new();
  }

  let mut out = Vec::new();
  for template in templates {
    expand_template(
      template,
      window,
      max_occurrences,
      tz,
      &mut out
    );
  }

  debug!(
    instances = out.len(),
    "expanded event templates"
  );
  out
}

fn expand_template(
  template: &EventTemplate,
  window: Window,
  max_occurrences: usize,
  tz: &Tz,
  out: &mut Vec<EventInstance>
) {
  let duration = template.duration();
  if duration <= Duration::zero() {
    warn!(
      id = %template.id,
      "skipping event whose end is not after its start"
    );
    return;
  }

  let recurrence = template.recurrence;
  if recurrence == Recurrence::None {
    if window.contains(template.start) {
      out.push(EventInstance {
        event:        template.clone(),
        is_recurring: false,
        original_id:  template.id.clone()
      });
    }
    return;
  }

  if recurrence
    == Recurrence::SpecificWeekdays
    && template.weekdays.is_empty()
  {
    warn!(
      id = %template.id,
      "skipping specific-weekday event with no weekdays"
    );
    return;
  }

  let effective_end = template
    .recurrence_until
    .map(|until| {
      end_of_day(until, tz)
        .min(window.end)
    })
    .unwrap_or(window.end);
  let anchor = template
    .start
    .with_timezone(tz)
    .naive_local();

  let mut emitted = 0_usize;
  let mut steps = 0_usize;
  while steps < max_occurrences {
    let Some(local) = nth_occurrence(
      anchor, recurrence, steps
    ) else {
      break;
    };
    steps += 1;

    let cursor = local_to_utc(tz, local);
    if cursor > effective_end {
      break;
    }
    if recurrence
      == Recurrence::SpecificWeekdays
      && !template
        .weekdays
        .contains_date(local.date())
    {
      continue;
    }
    if cursor < window.start {
      continue;
    }

    out.push(occurrence(
      template, cursor, duration
    ));
    emitted += 1;
  }

  trace!(
    id = %template.id,
    %recurrence,
    steps,
    emitted,
    "expanded recurring event"
  );
}

fn nth_occurrence(
  anchor: NaiveDateTime,
  recurrence: Recurrence,
  step: usize
) -> Option<NaiveDateTime> {
  let step = i64::try_from(step).ok()?;
  match recurrence {
    | Recurrence::None => {
      (step == 0).then_some(anchor)
    }
    | Recurrence::Daily
    | Recurrence::SpecificWeekdays => {
      TimeDelta::try_days(step).and_then(
        |delta| anchor.checked_add_signed(delta)
      )
    }
    | Recurrence::Weekly => {
      TimeDelta::try_weeks(step).and_then(
        |delta| anchor.checked_add_signed(delta)
      )
    }
    | Recurrence::Monthly => {
      let months =
        i32::try_from(step).ok()?;
      Some(
        shift_months(
          anchor.date(),
          months
        )
        .and_time(anchor.time())
      )
    }
  }
}

fn occurrence(
  template: &EventTemplate,
  start: DateTime<Utc>,
  duration: Duration
) -> EventInstance {
  let mut event = template.clone();
  event.id = format!(
    "{}_{}",
    template.id,
    start.timestamp_millis()
  );
  event.start = start;
  event.end = start + duration;

  EventInstance {
    event,
    is_recurring: true,
    original_id: template.id.clone()
  }
}

/// Recovers the template id from a
/// synthetic occurrence id
/// (`{template}_{epoch millis}`).
pub fn instance_template_id(
  id: &str
) -> Option<&str> {
  let (prefix, suffix) =
    id.rsplit_once('_')?;
  if prefix.is_empty()
    || suffix.parse::<i64>().is_err()
  {
    return None;
  }
  Some(prefix)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use chrono::{
    Datelike,
    NaiveDate,
    TimeZone,
    Timelike,
    Weekday
  };
  use chrono_tz::Tz;

  use super::*;
  use crate::datetime::start_of_day;
  use crate::event::WeekdaySet;

  const UTC: Tz = chrono_tz::UTC;

  fn at(
    y: i32,
    m: u32,
    d: u32,
    h: u32,
    min: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, m, d, h, min, 0)
      .single()
      .expect("valid instant")
  }

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn days_window(
    from: NaiveDate,
    to: NaiveDate
  ) -> Window {
    Window::new(
      start_of_day(from, &UTC),
      end_of_day(to, &UTC)
    )
  }

  fn template(
    id: &str,
    recurrence: Recurrence,
    start: DateTime<Utc>,
    minutes: i64
  ) -> EventTemplate {
    let mut event = EventTemplate::new(
      format!("event {id}"),
      start,
      start + Duration::minutes(minutes)
    );
    event.id = id.to_string();
    event.recurrence = recurrence;
    event
  }

  #[test]
  fn single_event_inside_window_passes_through()
  {
    let event = template(
      "one",
      Recurrence::None,
      at(2024, 1, 3, 14, 0),
      90
    );
    let out = expand(
      std::slice::from_ref(&event),
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 10)
      ),
      100,
      &UTC
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].event, event);
    assert!(!out[0].is_recurring);
    assert_eq!(out[0].original_id, "one");
  }

  #[test]
  fn single_event_outside_window_is_dropped()
  {
    let event = template(
      "one",
      Recurrence::None,
      at(2024, 2, 3, 14, 0),
      30
    );
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 31)
      ),
      100,
      &UTC
    );
    assert!(out.is_empty());
  }

  #[test]
  fn daily_series_fills_window() {
    let event = template(
      "daily",
      Recurrence::Daily,
      at(2024, 1, 1, 9, 0),
      60
    );
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 10)
      ),
      100,
      &UTC
    );
    assert_eq!(out.len(), 10);
    for (idx, instance) in
      out.iter().enumerate()
    {
      assert_eq!(
        instance.start().date_naive(),
        day(2024, 1, 1 + idx as u32)
      );
      assert_eq!(instance.start().hour(), 9);
      assert!(instance.is_recurring);
      assert_eq!(
        instance.original_id,
        "daily"
      );
    }
  }

  #[test]
  fn specific_weekdays_emit_only_selected_days()
  {
    let mut event = template(
      "gym",
      Recurrence::SpecificWeekdays,
      at(2024, 1, 7, 18, 0),
      60
    );
    event.weekdays =
      WeekdaySet::from_numbers([1, 3, 5])
        .expect("valid weekdays");

    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 7),
        day(2024, 1, 13)
      ),
      100,
      &UTC
    );
    let weekdays: Vec<Weekday> = out
      .iter()
      .map(|i| i.start().weekday())
      .collect();
    assert_eq!(
      weekdays,
      vec![
        Weekday::Mon,
        Weekday::Wed,
        Weekday::Fri
      ]
    );
  }

  #[test]
  fn weekly_steps_by_seven_days() {
    let event = template(
      "weekly",
      Recurrence::Weekly,
      at(2024, 1, 1, 10, 0),
      45
    );
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 22)
      ),
      100,
      &UTC
    );
    let days: Vec<NaiveDate> = out
      .iter()
      .map(|i| i.start().date_naive())
      .collect();
    assert_eq!(
      days,
      vec![
        day(2024, 1, 1),
        day(2024, 1, 8),
        day(2024, 1, 15),
        day(2024, 1, 22)
      ]
    );
  }

  #[test]
  fn recurrence_end_is_inclusive() {
    let mut event = template(
      "bounded",
      Recurrence::Daily,
      at(2024, 1, 1, 9, 0),
      60
    );
    event.recurrence_until =
      Some(day(2024, 1, 5));
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 31)
      ),
      365,
      &UTC
    );
    assert_eq!(out.len(), 5);
    assert_eq!(
      out.last()
        .map(|i| i.start().date_naive()),
      Some(day(2024, 1, 5))
    );
  }

  #[test]
  fn cap_bounds_unbounded_series() {
    let event = template(
      "capped",
      Recurrence::Daily,
      at(2024, 1, 1, 9, 0),
      60
    );
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 30)
      ),
      5,
      &UTC
    );
    assert_eq!(out.len(), 5);
  }

  #[test]
  fn cap_counts_filtered_steps() {
    let mut event = template(
      "sparse",
      Recurrence::SpecificWeekdays,
      at(2024, 1, 1, 9, 0),
      60
    );
    // Monday only: seven steps reach a
    // single emitted day.
    event.weekdays =
      WeekdaySet::from_numbers([1])
        .expect("valid weekdays");
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 3, 1)
      ),
      7,
      &UTC
    );
    assert_eq!(out.len(), 1);
  }

  #[test]
  fn duration_is_preserved_for_every_kind()
  {
    let mut weekdays = template(
      "w",
      Recurrence::SpecificWeekdays,
      at(2024, 1, 1, 8, 15),
      95
    );
    weekdays.weekdays =
      WeekdaySet::from_numbers([2, 4])
        .expect("valid weekdays");
    let templates = vec![
      template(
        "n",
        Recurrence::None,
        at(2024, 1, 2, 8, 0),
        30
      ),
      template(
        "d",
        Recurrence::Daily,
        at(2024, 1, 1, 23, 30),
        120
      ),
      template(
        "k",
        Recurrence::Weekly,
        at(2024, 1, 1, 7, 0),
        15
      ),
      template(
        "m",
        Recurrence::Monthly,
        at(2024, 1, 31, 12, 0),
        600
      ),
      weekdays,
    ];

    let out = expand(
      &templates,
      days_window(
        day(2024, 1, 1),
        day(2024, 6, 30)
      ),
      365,
      &UTC
    );
    assert!(!out.is_empty());
    for instance in &out {
      let source = templates
        .iter()
        .find(|t| {
          t.id == instance.original_id
        })
        .expect("source template");
      assert_eq!(
        instance.end() - instance.start(),
        source.duration()
      );
    }
  }

  #[test]
  fn start_before_window_still_contributes()
  {
    let event = template(
      "old",
      Recurrence::Weekly,
      at(2023, 12, 4, 10, 0),
      30
    );
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 14)
      ),
      100,
      &UTC
    );
    let days: Vec<NaiveDate> = out
      .iter()
      .map(|i| i.start().date_naive())
      .collect();
    assert_eq!(
      days,
      vec![
        day(2024, 1, 1),
        day(2024, 1, 8)
      ]
    );
  }

  #[test]
  fn monthly_clamps_and_returns_to_anchor_day()
  {
    let event = template(
      "rent",
      Recurrence::Monthly,
      at(2024, 1, 31, 9, 0),
      60
    );
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 5, 31)
      ),
      100,
      &UTC
    );
    let days: Vec<NaiveDate> = out
      .iter()
      .map(|i| i.start().date_naive())
      .collect();
    assert_eq!(
      days,
      vec![
        day(2024, 1, 31),
        day(2024, 2, 29),
        day(2024, 3, 31),
        day(2024, 4, 30),
        day(2024, 5, 31)
      ]
    );
  }

  #[test]
  fn daily_series_keeps_wall_clock_across_dst()
  {
    let tz: Tz =
      chrono_tz::America::New_York;
    let start = tz
      .with_ymd_and_hms(
        2024, 3, 8, 9, 0, 0
      )
      .single()
      .expect("valid local start")
      .with_timezone(&Utc);
    let event = template(
      "dst",
      Recurrence::Daily,
      start,
      60
    );
    let window = Window::new(
      start_of_day(day(2024, 3, 8), &tz),
      end_of_day(day(2024, 3, 12), &tz)
    );
    let out =
      expand(&[event], window, 100, &tz);
    assert_eq!(out.len(), 5);
    for instance in &out {
      assert_eq!(
        instance
          .start()
          .with_timezone(&tz)
          .hour(),
        9
      );
    }
  }

  #[test]
  fn misordered_window_yields_nothing() {
    let event = template(
      "daily",
      Recurrence::Daily,
      at(2024, 1, 1, 9, 0),
      60
    );
    let window = Window::new(
      at(2024, 1, 10, 0, 0),
      at(2024, 1, 1, 0, 0)
    );
    assert!(window.is_empty());
    assert!(
      expand(&[event], window, 100, &UTC)
        .is_empty()
    );
  }

  #[test]
  fn malformed_templates_are_skipped() {
    let mut inverted = template(
      "inverted",
      Recurrence::Daily,
      at(2024, 1, 1, 9, 0),
      60
    );
    inverted.end =
      inverted.start - Duration::hours(1);
    let no_days = template(
      "no-days",
      Recurrence::SpecificWeekdays,
      at(2024, 1, 1, 9, 0),
      60
    );
    let good = template(
      "good",
      Recurrence::None,
      at(2024, 1, 2, 9, 0),
      60
    );

    let out = expand(
      &[inverted, no_days, good],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 31)
      ),
      100,
      &UTC
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id(), "good");
  }

  #[test]
  fn expansion_is_idempotent() {
    let mut weekdays = template(
      "w",
      Recurrence::SpecificWeekdays,
      at(2024, 1, 1, 8, 0),
      60
    );
    weekdays.weekdays =
      WeekdaySet::from_numbers([0, 6])
        .expect("valid weekdays");
    let templates = vec![
      template(
        "d",
        Recurrence::Daily,
        at(2024, 1, 1, 9, 0),
        30
      ),
      weekdays,
    ];
    let window = days_window(
      day(2024, 1, 1),
      day(2024, 2, 15)
    );

    let key = |out: Vec<EventInstance>| {
      out
        .into_iter()
        .map(|i| {
          (i.event.id, i.event.start, i.event.end)
        })
        .collect::<BTreeSet<_>>()
    };
    let first = key(expand(
      &templates, window, 365, &UTC
    ));
    let second = key(expand(
      &templates, window, 365, &UTC
    ));
    assert!(!first.is_empty());
    assert_eq!(first, second);
  }

  #[test]
  fn occurrence_ids_are_unique_and_reversible()
  {
    let event = template(
      "abc-123",
      Recurrence::Daily,
      at(2024, 1, 1, 9, 0),
      60
    );
    let out = expand(
      &[event],
      days_window(
        day(2024, 1, 1),
        day(2024, 1, 3)
      ),
      100,
      &UTC
    );
    assert_eq!(
      out[0].id(),
      format!(
        "abc-123_{}",
        at(2024, 1, 1, 9, 0)
          .timestamp_millis()
      )
    );
    let ids: BTreeSet<&str> =
      out.iter().map(|i| i.id()).collect();
    assert_eq!(ids.len(), out.len());
    for instance in &out {
      assert_eq!(
        instance_template_id(instance.id()),
        Some("abc-123")
      );
    }
    assert_eq!(
      instance_template_id("plain-id"),
      None
    );
  }
}
