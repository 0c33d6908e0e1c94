mod event_ops;
mod modifiers;
mod reminders;
mod views;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{
  debug,
  instrument
};

use self::event_ops::{
  cmd_add,
  cmd_delete,
  cmd_modify
};
use self::reminders::{
  cmd_remind,
  cmd_remind_add,
  cmd_remind_delete,
  cmd_reminders
};
use self::views::{
  cmd_day,
  cmd_export,
  cmd_info,
  cmd_list,
  cmd_month,
  cmd_upcoming
};
use crate::agenda::resolve_template;
use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::event::EventTemplate;
use crate::render::Renderer;

pub fn known_command_names()
-> Vec<&'static str> {
  vec![
    "add",
    "modify",
    "delete",
    "list",
    "info",
    "month",
    "day",
    "upcoming",
    "export",
    "remind-add",
    "reminders",
    "remind-delete",
    "remind",
    "_commands",
    "_show",
    "help",
    "version",
  ]
}

pub fn expand_command_abbrev<'a>(
  token: &'a str,
  known: &[&'a str]
) -> Option<&'a str> {
  if known.contains(&token) {
    return Some(token);
  }

  let mut matches =
    known.iter().copied().filter(|name| {
      name.starts_with(token)
    });
  let first = matches.next()?;
  if matches.next().is_some() {
    None
  } else {
    Some(first)
  }
}

#[instrument(skip(
  store, cfg, renderer, inv
))]
pub fn dispatch(
  store: &mut DataStore,
  cfg: &Config,
  renderer: &mut Renderer,
  inv: Invocation
) -> anyhow::Result<()> {
  let now = Utc::now();
  let tz = cfg.timezone;
  let command = inv.command.as_str();

  debug!(
      command,
      args = ?inv.command_args,
      timezone = %tz,
      "dispatching command"
  );

  match command {
    | "add" => {
      cmd_add(
        store,
        &inv.command_args,
        now,
        &tz
      )
    }
    | "modify" => {
      cmd_modify(
        store,
        &inv.command_args,
        now,
        &tz
      )
    }
    | "delete" => {
      cmd_delete(store, &inv.command_args)
    }
    | "list" => cmd_list(store, renderer),
    | "info" => {
      cmd_info(
        store,
        cfg,
        renderer,
        &inv.command_args,
        now,
        &tz
      )
    }
    | "month" => {
      cmd_month(
        store,
        cfg,
        renderer,
        &inv.command_args,
        now,
        &tz
      )
    }
    | "day" => {
      cmd_day(
        store,
        cfg,
        renderer,
        &inv.command_args,
        now,
        &tz
      )
    }
    | "upcoming" => {
      cmd_upcoming(
        store, cfg, renderer, now, &tz
      )
    }
    | "export" => {
      cmd_export(
        store,
        cfg,
        &inv.command_args,
        now,
        &tz
      )
    }
    | "remind-add" => {
      cmd_remind_add(
        store,
        &inv.command_args
      )
    }
    | "reminders" => {
      cmd_reminders(
        store, renderer, now, &tz
      )
    }
    | "remind-delete" => {
      cmd_remind_delete(
        store,
        &inv.command_args
      )
    }
    | "remind" => cmd_remind(store, tz),
    | "_commands" => cmd_commands(),
    | "_show" => cmd_show(cfg),
    | "help" => cmd_help(),
    | "version" => {
      println!(
        "{}",
        env!("CARGO_PKG_VERSION")
      );
      Ok(())
    }
    | other => {
      Err(anyhow!(
        "unknown command: {other}"
      ))
    }
  }
}

/// Finds a template by exact id, by a
/// synthetic occurrence id, or by a unique
/// id prefix as shown in tables.
fn find_template<'a>(
  id: &str,
  templates: &'a [EventTemplate]
) -> anyhow::Result<&'a EventTemplate> {
  if let Some(found) =
    resolve_template(id, templates)
  {
    return Ok(found);
  }

  let id = id.trim();
  if id.is_empty() {
    return Err(anyhow!(
      "an event id is required"
    ));
  }
  let mut matches = templates
    .iter()
    .filter(|t| t.id.starts_with(id));
  match (matches.next(), matches.next())
  {
    | (Some(found), None) => Ok(found),
    | (Some(_), Some(_)) => {
      Err(anyhow!(
        "event id prefix is ambiguous: \
         {id}"
      ))
    }
    | _ => {
      Err(anyhow!(
        "no event matches id: {id}"
      ))
    }
  }
}

fn cmd_commands() -> anyhow::Result<()>
{
  for command in known_command_names() {
    println!("{command}");
  }
  Ok(())
}

fn cmd_show(
  cfg: &Config
) -> anyhow::Result<()> {
  for (k, v) in cfg.entries() {
    println!("{k}={v}");
  }
  Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
  println!(
    "Commands: add, modify, delete, \
     list, info, month, day, upcoming, \
     export, remind-add, reminders, \
     remind-delete, remind, _show, \
     version\n\
     Event modifiers: start: end: dur: \
     recur: days: until: color: at: desc:"
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  #[test]
  fn abbreviation_requires_a_unique_prefix()
  {
    let known = known_command_names();
    assert_eq!(
      expand_command_abbrev("up", &known),
      Some("upcoming")
    );
    assert_eq!(
      expand_command_abbrev(
        "remind", &known
      ),
      Some("remind")
    );
    assert_eq!(
      expand_command_abbrev(
        "remind-d", &known
      ),
      Some("remind-delete")
    );
    assert_eq!(
      expand_command_abbrev("m", &known),
      None
    );
  }

  #[test]
  fn templates_resolve_by_prefix_and_occurrence_id()
  {
    let start = Utc
      .with_ymd_and_hms(
        2024, 1, 1, 9, 0, 0
      )
      .single()
      .expect("valid start");
    let mut a = EventTemplate::new(
      "Standup".to_string(),
      start,
      start + chrono::Duration::hours(1)
    );
    a.id = "abc123".to_string();
    let mut b = a.clone();
    b.id = "abd456".to_string();
    let templates = vec![a, b];

    assert_eq!(
      find_template("abc", &templates)
        .expect("prefix")
        .id,
      "abc123"
    );
    assert_eq!(
      find_template(
        "abd456_1704099600000",
        &templates
      )
      .expect("occurrence id")
      .id,
      "abd456"
    );
    assert!(
      find_template("ab", &templates)
        .is_err()
    );
    assert!(
      find_template("zzz", &templates)
        .is_err()
    );
  }
}
