use std::fs;
use std::io::{
  BufRead,
  BufReader,
  Write
};
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{
  debug,
  info,
  warn
};

use crate::event::EventTemplate;
use crate::reminder::ReminderRule;

#[derive(Debug)]
pub struct DataStore {
  pub data_dir:       PathBuf,
  pub events_path:    PathBuf,
  pub reminders_path: PathBuf
}

impl DataStore {
  #[tracing::instrument(skip(data_dir))]
  pub fn open(
    data_dir: &Path
  ) -> anyhow::Result<Self> {
    let data_dir = data_dir.to_path_buf();
    fs::create_dir_all(&data_dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          data_dir.display()
        )
      })?;

    let events_path =
      data_dir.join("events.data");
    let reminders_path =
      data_dir.join("reminders.data");

    for path in
      [&events_path, &reminders_path]
    {
      if !path.exists() {
        fs::write(path, "").with_context(
          || {
            format!(
              "failed to create {}",
              path.display()
            )
          }
        )?;
      }
    }

    info!(
      data_dir = %data_dir.display(),
      events = %events_path.display(),
      reminders = %reminders_path.display(),
      "opened datastore"
    );

    Ok(Self {
      data_dir,
      events_path,
      reminders_path
    })
  }

  #[tracing::instrument(skip(self))]
  pub fn load_events(
    &self
  ) -> anyhow::Result<Vec<EventTemplate>>
  {
    Ok(self.read_events()?.records)
  }

  /// Replaces every readable event. Lines
  /// that never parsed are kept as they
  /// are.
  #[tracing::instrument(skip(
    self, events
  ))]
  pub fn save_events(
    &self,
    events: &[EventTemplate]
  ) -> anyhow::Result<()> {
    let unreadable =
      self.read_events()?.unreadable;
    self.write_events(events, &unreadable)
  }

  #[tracing::instrument(skip(self))]
  pub fn load_reminders(
    &self
  ) -> anyhow::Result<Vec<ReminderRule>>
  {
    Ok(self.read_reminders()?.records)
  }

  #[tracing::instrument(skip(
    self, rules
  ))]
  pub fn save_reminders(
    &self,
    rules: &[ReminderRule]
  ) -> anyhow::Result<()> {
    let unreadable =
      self.read_reminders()?.unreadable;
    self.write_reminders(rules, &unreadable)
  }

  #[tracing::instrument(
    skip(self, event),
    fields(id = %event.id)
  )]
  pub fn add_event(
    &self,
    event: EventTemplate
  ) -> anyhow::Result<Vec<EventTemplate>>
  {
    let Lines {
      mut records,
      unreadable
    } = self.read_events()?;
    if records
      .iter()
      .any(|e| e.id == event.id)
    {
      return Err(anyhow!(
        "event id already exists: {}",
        event.id
      ));
    }
    records.push(event);
    records.sort_by(|a, b| {
      b.start.cmp(&a.start)
    });
    self.write_events(&records, &unreadable)?;
    Ok(records)
  }

  #[tracing::instrument(
    skip(self, event),
    fields(id = %event.id)
  )]
  pub fn replace_event(
    &self,
    event: EventTemplate
  ) -> anyhow::Result<()> {
    let Lines {
      mut records,
      unreadable
    } = self.read_events()?;
    let slot = records
      .iter_mut()
      .find(|e| e.id == event.id)
      .ok_or_else(|| {
        anyhow!(
          "event not found: {}",
          event.id
        )
      })?;
    *slot = event;
    self.write_events(&records, &unreadable)
  }

  /// Removes the template and with it
  /// every occurrence it produces.
  #[tracing::instrument(skip(self))]
  pub fn delete_event(
    &self,
    id: &str
  ) -> anyhow::Result<bool> {
    let Lines {
      mut records,
      unreadable
    } = self.read_events()?;
    let before = records.len();
    records.retain(|e| e.id != id);
    if records.len() == before {
      return Ok(false);
    }
    self.write_events(&records, &unreadable)?;
    Ok(true)
  }

  #[tracing::instrument(
    skip(self, rule),
    fields(id = %rule.id)
  )]
  pub fn add_reminder(
    &self,
    rule: ReminderRule
  ) -> anyhow::Result<()> {
    let Lines {
      mut records,
      unreadable
    } = self.read_reminders()?;
    records.push(rule);
    self.write_reminders(&records, &unreadable)
  }

  #[tracing::instrument(skip(self))]
  pub fn delete_reminder(
    &self,
    id: &str
  ) -> anyhow::Result<bool> {
    let Lines {
      mut records,
      unreadable
    } = self.read_reminders()?;
    let before = records.len();
    records.retain(|r| r.id != id);
    if records.len() == before {
      return Ok(false);
    }
    self.write_reminders(&records, &unreadable)?;
    Ok(true)
  }

  fn read_events(
    &self
  ) -> anyhow::Result<Lines<EventTemplate>>
  {
    load_jsonl(&self.events_path)
      .context(
        "failed to load events.data"
      )
  }

  fn write_events(
    &self,
    events: &[EventTemplate],
    unreadable: &[String]
  ) -> anyhow::Result<()> {
    save_jsonl_atomic(
      &self.events_path,
      events,
      unreadable
    )
    .context("failed to save events.data")
  }

  fn read_reminders(
    &self
  ) -> anyhow::Result<Lines<ReminderRule>>
  {
    load_jsonl(&self.reminders_path)
      .context(
        "failed to load reminders.data"
      )
  }

  fn write_reminders(
    &self,
    rules: &[ReminderRule],
    unreadable: &[String]
  ) -> anyhow::Result<()> {
    save_jsonl_atomic(
      &self.reminders_path,
      rules,
      unreadable
    )
    .context(
      "failed to save reminders.data"
    )
  }
}

/// Parsed records of a JSONL file and the
/// raw lines that did not parse.
#[derive(Debug)]
struct Lines<T> {
  records:    Vec<T>,
  unreadable: Vec<String>
}

/// Reads one record per line. Lines that
/// do not parse are logged and handed back
/// raw so a rewrite can keep them.
#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(
  path: &Path
) -> anyhow::Result<Lines<T>> {
  debug!(file = %path.display(), "loading jsonl");
  let file =
    fs::File::open(path).with_context(
      || {
        format!(
          "failed to open {}",
          path.display()
        )
      }
    )?;
  let reader = BufReader::new(file);

  let mut records = Vec::new();
  let mut unreadable = Vec::new();
  for (idx, line) in
    reader.lines().enumerate()
  {
    let line = line?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    match serde_json::from_str::<T>(
      trimmed
    ) {
      | Ok(record) => records.push(record),
      | Err(err) => {
        warn!(
          file = %path.display(),
          line = idx + 1,
          error = %err,
          "skipping malformed record"
        );
        unreadable.push(line);
      }
    }
  }

  debug!(
    count = records.len(),
    unreadable = unreadable.len(),
    "loaded records from jsonl"
  );
  Ok(Lines {
    records,
    unreadable
  })
}

/// Writes `records` followed by the
/// `unreadable` lines verbatim.
#[tracing::instrument(skip(
  path, records, unreadable
))]
fn save_jsonl_atomic<T: Serialize>(
  path: &Path,
  records: &[T],
  unreadable: &[String]
) -> anyhow::Result<()> {
  debug!(
    file = %path.display(),
    count = records.len(),
    kept = unreadable.len(),
    "saving jsonl atomically"
  );

  let dir = path
    .parent()
    .unwrap_or_else(|| Path::new("."));
  let mut temp =
    NamedTempFile::new_in(dir)?;
  for record in records {
    let serialized =
      serde_json::to_string(record)?;
    writeln!(temp, "{serialized}")?;
  }
  for line in unreadable {
    writeln!(temp, "{line}")?;
  }
  temp.flush()?;

  temp.persist(path).map_err(|err| {
    anyhow!(
      "failed to persist {}: {}",
      path.display(),
      err
    )
  })?;

  Ok(())
}
