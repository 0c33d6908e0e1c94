//! Posting reminders: rules saying which
//! content to post at which local times on
//! which weekdays, and an in-memory
//! scheduler that fires them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{
  DateTime,
  NaiveTime,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tokio::task::JoinHandle;
use tracing::{
  debug,
  info,
  warn
};
use uuid::Uuid;

use crate::datetime::{
  add_days,
  local_to_utc,
  parse_clock_time,
  to_local_date
};
use crate::event::WeekdaySet;

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq
)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
  Stories,
  Reels,
  Feed,
  Carrossel,
  #[serde(other)]
  Other
}

impl ContentKind {
  pub fn display_name(
    self
  ) -> &'static str {
    match self {
      | ContentKind::Stories => "Stories",
      | ContentKind::Reels => "Reels",
      | ContentKind::Feed => "Feed",
      | ContentKind::Carrossel => {
        "Carousel"
      }
      | ContentKind::Other => "content"
    }
  }

  pub fn parse(raw: &str) -> Self {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "stories" | "story" => {
        ContentKind::Stories
      }
      | "reels" | "reel" => {
        ContentKind::Reels
      }
      | "feed" => ContentKind::Feed,
      | "carrossel" | "carousel" => {
        ContentKind::Carrossel
      }
      | _ => ContentKind::Other
    }
  }
}

impl fmt::Display for ContentKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.display_name())
  }
}

fn default_true() -> bool {
  true
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq
)]
pub struct ReminderRule {
  pub id: String,

  #[serde(rename = "tipo_conteudo")]
  pub kind: ContentKind,

  #[serde(rename = "horarios", default)]
  pub times: Vec<String>,

  #[serde(rename = "dias_semana", default)]
  pub weekdays: WeekdaySet,

  #[serde(
    rename = "ativo",
    default = "default_true"
  )]
  pub active: bool,

  #[serde(flatten)]
  pub extra:
    BTreeMap<String, serde_json::Value>
}

impl ReminderRule {
  pub fn new(
    kind: ContentKind,
    times: Vec<String>,
    weekdays: WeekdaySet
  ) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      kind,
      times,
      weekdays,
      active: true,
      extra: BTreeMap::new()
    }
  }

  /// Parsed times of day; malformed
  /// entries are logged and dropped.
  pub fn clock_times(
    &self
  ) -> Vec<NaiveTime> {
    let mut out = Vec::new();
    for raw in &self.times {
      match parse_clock_time(raw) {
        | Some(time) => out.push(time),
        | None => {
          warn!(
            rule = %self.id,
            time = %raw,
            "ignoring malformed reminder time"
          );
        }
      }
    }
    out
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReminder {
  pub rule_id: String,
  pub kind:    ContentKind,
  pub time:    NaiveTime,
  pub fire_at: DateTime<Utc>
}

impl PlannedReminder {
  pub fn title(&self) -> String {
    format!(
      "Time to post {}!",
      self.kind.display_name()
    )
  }

  pub fn body(&self) -> String {
    format!(
      "It is {} - a good slot for \
       engagement. Create your content \
       now!",
      self.time.format("%H:%M")
    )
  }
}

/// Next instant strictly after `after` at
/// `time` local to `tz` on an enabled
/// weekday.
pub fn next_fire(
  time: NaiveTime,
  weekdays: &WeekdaySet,
  after: DateTime<Utc>,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  if weekdays.is_empty() {
    return None;
  }
  let today = to_local_date(after, tz);
  (0..=7).find_map(|offset| {
    let date = add_days(today, offset);
    if !weekdays.contains_date(date) {
      return None;
    }
    let candidate = local_to_utc(
      tz,
      date.and_time(time)
    );
    (candidate > after)
      .then_some(candidate)
  })
}

fn plan_slot(
  rule: &ReminderRule,
  time: NaiveTime,
  after: DateTime<Utc>,
  tz: &Tz
) -> Option<PlannedReminder> {
  let fire_at = next_fire(
    time,
    &rule.weekdays,
    after,
    tz
  )?;
  Some(PlannedReminder {
    rule_id: rule.id.clone(),
    kind: rule.kind,
    time,
    fire_at
  })
}

/// The next firing of every active rule
/// and time, soonest first.
#[tracing::instrument(skip(rules, tz))]
pub fn plan(
  rules: &[ReminderRule],
  now: DateTime<Utc>,
  tz: &Tz
) -> Vec<PlannedReminder> {
  let mut out: Vec<PlannedReminder> =
    rules
      .iter()
      .filter(|rule| rule.active)
      .flat_map(|rule| {
        rule
          .clock_times()
          .into_iter()
          .filter_map(move |time| {
            plan_slot(rule, time, now, tz)
          })
      })
      .collect();
  out.sort_by_key(|r| r.fire_at);
  debug!(
    planned = out.len(),
    "planned reminders"
  );
  out
}

pub trait Notifier: Send + Sync {
  fn deliver(
    &self,
    reminder: &PlannedReminder
  );
}

/// Prints reminders to stdout and logs
/// them.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn deliver(
    &self,
    reminder: &PlannedReminder
  ) {
    info!(
      rule = %reminder.rule_id,
      kind = %reminder.kind,
      fire_at = %reminder.fire_at,
      "delivering reminder"
    );
    println!(
      "{} {}",
      reminder.title(),
      reminder.body()
    );
  }
}

/// Owns one timer task per (rule, time).
/// Handles live only in memory; dropping
/// the scheduler aborts them.
pub struct ReminderScheduler {
  notifier: Arc<dyn Notifier>,
  timezone: Tz,
  handles:  Vec<JoinHandle<()>>
}

impl ReminderScheduler {
  pub fn new(
    notifier: Arc<dyn Notifier>,
    timezone: Tz
  ) -> Self {
    Self {
      notifier,
      timezone,
      handles: Vec::new()
    }
  }

  /// Replaces the running schedule with
  /// one built from `rules`. Must be
  /// called inside a tokio runtime.
  pub fn start(
    &mut self,
    rules: &[ReminderRule]
  ) -> anyhow::Result<usize> {
    self.start_from(rules, Utc::now())
  }

  /// Like [`start`](Self::start), planning
  /// the first firings after `from`.
  #[tracing::instrument(skip(self, rules))]
  pub fn start_from(
    &mut self,
    rules: &[ReminderRule],
    from: DateTime<Utc>
  ) -> anyhow::Result<usize> {
    let runtime =
      tokio::runtime::Handle::try_current()
        .map_err(|err| {
          anyhow!(
            "reminder scheduler needs a \
             tokio runtime: {err}"
          )
        })?;
    self.stop();

    for rule in
      rules.iter().filter(|r| r.active)
    {
      if rule.weekdays.is_empty() {
        warn!(
          rule = %rule.id,
          "reminder rule has no weekdays; skipping"
        );
        continue;
      }
      for time in rule.clock_times() {
        let rule = rule.clone();
        let notifier =
          Arc::clone(&self.notifier);
        let tz = self.timezone;
        self.handles.push(runtime.spawn(
          async move {
            run_slot(
              rule, time, notifier, tz, from
            )
            .await;
          }
        ));
      }
    }

    info!(
      tasks = self.handles.len(),
      "reminder scheduler started"
    );
    Ok(self.handles.len())
  }

  pub fn stop(&mut self) {
    if self.handles.is_empty() {
      return;
    }
    let count = self.handles.len();
    for handle in self.handles.drain(..) {
      handle.abort();
    }
    info!(
      tasks = count,
      "reminder scheduler stopped"
    );
  }

  pub fn active(&self) -> usize {
    self
      .handles
      .iter()
      .filter(|h| !h.is_finished())
      .count()
  }
}

impl Drop for ReminderScheduler {
  fn drop(&mut self) {
    self.stop();
  }
}

async fn run_slot(
  rule: ReminderRule,
  time: NaiveTime,
  notifier: Arc<dyn Notifier>,
  tz: Tz,
  from: DateTime<Utc>
) {
  let mut after = from;
  loop {
    let Some(planned) =
      plan_slot(&rule, time, after, &tz)
    else {
      warn!(
        rule = %rule.id,
        "no future firing for reminder; ending task"
      );
      return;
    };

    let wait = (planned.fire_at - after)
      .to_std()
      .unwrap_or_default();
    debug!(
      rule = %rule.id,
      fire_at = %planned.fire_at,
      wait_secs = wait.as_secs(),
      "sleeping until reminder"
    );
    tokio::time::sleep(wait).await;

    notifier.deliver(&planned);
    after = planned.fire_at;
  }
}
