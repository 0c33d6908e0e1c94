use anyhow::anyhow;
use chrono::{
  DateTime,
  Duration,
  Utc
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  instrument
};

use super::find_template;
use super::modifiers::{
  Mod,
  apply_mods,
  parse_one_mod,
  parse_title_and_mods
};
use crate::datastore::DataStore;
use crate::event::EventTemplate;

const DEFAULT_EVENT_MINUTES: i64 = 60;

#[instrument(skip(store, args, now, tz))]
pub(super) fn cmd_add(
  store: &mut DataStore,
  args: &[String],
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command add");

  let (title, mods) =
    parse_title_and_mods(args, now, tz)?;
  let start = mods
    .iter()
    .find_map(|m| match m {
      | Mod::Start(dt) => Some(*dt),
      | _ => None
    })
    .ok_or_else(|| {
      anyhow!(
        "add: start:<date> is required"
      )
    })?;

  let end = start
    .checked_add_signed(Duration::minutes(
      DEFAULT_EVENT_MINUTES
    ))
    .ok_or_else(|| {
      anyhow!(
        "add: start is too close to the \
         end of the supported range"
      )
    })?;
  let mut event =
    EventTemplate::new(title, start, end);
  apply_mods(&mut event, &mods)?;
  event.validate(tz)?;

  let id = event.id.clone();
  let events = store.add_event(event)?;

  debug!(
    event_count = events.len(),
    "event added"
  );
  println!("Created event {id}.");
  Ok(())
}

/// Edits the template behind `id`. Words
/// that are not modifiers replace the
/// title.
#[instrument(skip(store, args, now, tz))]
pub(super) fn cmd_modify(
  store: &mut DataStore,
  args: &[String],
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<()> {
  info!("command modify");

  let (id, rest) =
    args.split_first().ok_or_else(|| {
      anyhow!("modify: event id required")
    })?;

  let events = store.load_events()?;
  let mut event =
    find_template(id, &events)?.clone();

  let mut mods = Vec::new();
  let mut title_parts = Vec::new();
  for arg in rest {
    match parse_one_mod(arg, now, tz)? {
      | Some(one_mod) => mods.push(one_mod),
      | None => title_parts.push(arg.clone())
    }
  }
  if mods.is_empty()
    && title_parts.is_empty()
  {
    return Err(anyhow!(
      "modify: nothing to change"
    ));
  }

  if !title_parts.is_empty() {
    event.title = title_parts.join(" ");
  }
  apply_mods(&mut event, &mods)?;
  event.validate(tz)?;

  let target = event.id.clone();
  store.replace_event(event)?;
  println!("Modified event {target}.");
  Ok(())
}

/// Removing an occurrence removes the
/// whole series.
#[instrument(skip(store, args))]
pub(super) fn cmd_delete(
  store: &mut DataStore,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command delete");

  let id = args.first().ok_or_else(|| {
    anyhow!("delete: event id required")
  })?;

  let events = store.load_events()?;
  let event = find_template(id, &events)?;
  let recurring =
    event.recurrence.is_recurring();

  if !store.delete_event(&event.id)? {
    return Err(anyhow!(
      "event vanished before delete: {}",
      event.id
    ));
  }

  if recurring {
    println!(
      "Deleted event '{}' and all of \
       its occurrences.",
      event.title
    );
  } else {
    println!(
      "Deleted event '{}'.",
      event.title
    );
  }
  Ok(())
}
