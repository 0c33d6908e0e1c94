use std::sync::Arc;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Utc
};
use chrono_tz::Tz;
use tracing::{
  info,
  instrument
};

use crate::datastore::DataStore;
use crate::datetime::parse_clock_time;
use crate::event::WeekdaySet;
use crate::reminder::{
  ContentKind,
  ReminderRule,
  ReminderScheduler,
  TracingNotifier,
  plan
};
use crate::render::Renderer;

fn every_day() -> WeekdaySet {
  WeekdaySet::from_numbers(0..=6)
    .unwrap_or_default()
}

/// `remind-add <type> times:HH:MM,...
/// [days:<list>]`
#[instrument(skip(store, args))]
pub(super) fn cmd_remind_add(
  store: &mut DataStore,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command remind-add");

  let (kind, rest) =
    args.split_first().ok_or_else(|| {
      anyhow!(
        "remind-add: content type \
         required (stories, reels, feed, \
         carrossel)"
      )
    })?;

  let mut times = Vec::new();
  let mut weekdays = None;
  for arg in rest {
    match arg.split_once(':') {
      | Some(("times", value)) => {
        for raw in value.split(',') {
          let raw = raw.trim();
          if raw.is_empty() {
            continue;
          }
          let time = parse_clock_time(raw)
            .ok_or_else(|| {
              anyhow!(
                "invalid reminder time: \
                 {raw}"
              )
            })?;
          times.push(
            time.format("%H:%M").to_string()
          );
        }
      }
      | Some(("days", value)) => {
        weekdays =
          Some(value.parse::<WeekdaySet>()?);
      }
      | _ => {
        return Err(anyhow!(
          "remind-add: unexpected \
           argument {arg}"
        ));
      }
    }
  }

  if times.is_empty() {
    return Err(anyhow!(
      "remind-add: times:<HH:MM,...> is \
       required"
    ));
  }
  let weekdays =
    weekdays.unwrap_or_else(every_day);
  if weekdays.is_empty() {
    return Err(anyhow!(
      "remind-add: at least one weekday \
       is required"
    ));
  }

  let rule = ReminderRule::new(
    ContentKind::parse(kind),
    times,
    weekdays
  );
  let id = rule.id.clone();
  store.add_reminder(rule)?;
  println!("Created reminder {id}.");
  Ok(())
}

#[instrument(skip(
  store, renderer, now, tz
))]
pub(super) fn cmd_reminders(
  store: &mut DataStore,
  renderer: &mut Renderer,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command reminders");

  let rules = store.load_reminders()?;
  if rules.is_empty() {
    println!("No reminders.");
    return Ok(());
  }
  let planned = plan(&rules, now, tz);
  renderer.print_reminders(&rules, &planned)
}

#[instrument(skip(store, args))]
pub(super) fn cmd_remind_delete(
  store: &mut DataStore,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command remind-delete");

  let id = args.first().ok_or_else(|| {
    anyhow!(
      "remind-delete: reminder id \
       required"
    )
  })?;

  let rules = store.load_reminders()?;
  let mut matches = rules
    .iter()
    .filter(|r| r.id.starts_with(id.as_str()));
  let target = match (
    matches.next(),
    matches.next()
  ) {
    | (Some(rule), None) => rule.id.clone(),
    | (Some(_), Some(_)) => {
      return Err(anyhow!(
        "reminder id prefix is \
         ambiguous: {id}"
      ));
    }
    | _ => {
      return Err(anyhow!(
        "no reminder matches id: {id}"
      ));
    }
  };

  store.delete_reminder(&target)?;
  println!("Deleted reminder {target}.");
  Ok(())
}

/// Runs the reminder scheduler in the
/// foreground until Ctrl-C.
#[instrument(skip(store))]
pub(super) fn cmd_remind(
  store: &mut DataStore,
  tz: Tz
) -> anyhow::Result<()> {
  info!("command remind");

  let rules = store.load_reminders()?;
  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to build tokio runtime"
      )?;

  runtime.block_on(run_until_interrupted(
    rules, tz
  ))
}

async fn run_until_interrupted(
  rules: Vec<ReminderRule>,
  tz: Tz
) -> anyhow::Result<()> {
  let mut scheduler =
    ReminderScheduler::new(
      Arc::new(TracingNotifier),
      tz
    );
  let started = scheduler.start(&rules)?;
  if started == 0 {
    println!(
      "No active reminders to schedule."
    );
    return Ok(());
  }

  println!(
    "Scheduled {started} reminder \
     slot(s). Press Ctrl-C to stop."
  );
  tokio::signal::ctrl_c()
    .await
    .context(
      "failed to listen for Ctrl-C"
    )?;
  scheduler.stop();
  Ok(())
}
