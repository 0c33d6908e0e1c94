use std::io::{
  self,
  IsTerminal,
  Write
};

use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::agenda::DayCell;
use crate::config::Config;
use crate::datetime::format_local;
use crate::event::{
  EventInstance,
  EventTemplate,
  Recurrence
};
use crate::reminder::{
  PlannedReminder,
  ReminderRule
};

/// Terminal output. Times are shown in
/// the configured timezone.
#[derive(Debug, Clone)]
pub struct Renderer {
  color: bool,
  tz:    Tz
}

impl Renderer {
  #[must_use]
  pub fn new(cfg: &Config) -> Self {
    Self {
      color: cfg.color,
      tz:    cfg.timezone
    }
  }

  fn when(
    &self,
    dt: DateTime<Utc>
  ) -> String {
    format_local(dt, &self.tz)
  }

  #[tracing::instrument(skip(
    self, events
  ))]
  pub fn print_event_table(
    &mut self,
    events: &[EventTemplate]
  ) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    let headers = vec![
      "ID".to_string(),
      "Start".to_string(),
      "End".to_string(),
      "Repeats".to_string(),
      "Title".to_string(),
    ];

    let rows = events
      .iter()
      .map(|event| {
        vec![
          self.paint(&short_id(&event.id), "33"),
          self.when(event.start),
          self.when(event.end),
          recurrence_summary(event),
          event.title.clone(),
        ]
      })
      .collect();

    write_table(&mut out, headers, rows)
  }

  #[tracing::instrument(skip(
    self, instances
  ))]
  pub fn print_instances(
    &mut self,
    instances: &[EventInstance]
  ) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    let headers = vec![
      "When".to_string(),
      "Until".to_string(),
      "Title".to_string(),
      "Where".to_string(),
      "Series".to_string(),
    ];

    let rows = instances
      .iter()
      .map(|instance| {
        let series = if instance.is_recurring
        {
          self.paint(
            &short_id(&instance.original_id),
            "36"
          )
        } else {
          String::new()
        };
        vec![
          self.paint(
            &self.when(instance.start()),
            "33"
          ),
          self.when(instance.end()),
          instance.event.title.clone(),
          instance
            .event
            .location
            .clone()
            .unwrap_or_default(),
          series,
        ]
      })
      .collect();

    write_table(&mut out, headers, rows)
  }

  #[tracing::instrument(skip(
    self, event
  ))]
  pub fn print_event_info(
    &mut self,
    event: &EventTemplate
  ) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();

    writeln!(out, "id        {}", event.id)?;
    writeln!(out, "title     {}", event.title)?;
    writeln!(
      out,
      "start     {}",
      self.when(event.start)
    )?;
    writeln!(
      out,
      "end       {}",
      self.when(event.end)
    )?;
    writeln!(
      out,
      "repeats   {}",
      recurrence_summary(event)
    )?;
    if let Some(until) =
      event.recurrence_until
    {
      writeln!(out, "until     {until}")?;
    }
    if let Some(location) = &event.location
    {
      writeln!(out, "where     {location}")?;
    }
    writeln!(
      out,
      "color     {}",
      event.color_or_default()
    )?;
    if let Some(description) =
      &event.description
    {
      writeln!(out, "desc      {description}")?;
    }

    Ok(())
  }

  /// Month grid with a `*` per event dot,
  /// weeks starting on Sunday.
  #[tracing::instrument(skip(
    self, cells
  ))]
  pub fn print_month_grid(
    &mut self,
    focus: NaiveDate,
    cells: &[DayCell]
  ) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", focus.format("%B %Y"))?;
    writeln!(
      out,
      "Sun    Mon    Tue    Wed    Thu    Fri    Sat"
    )?;

    let Some(first) = cells.first() else {
      return Ok(());
    };
    let lead = first
      .date
      .weekday()
      .num_days_from_sunday()
      as usize;
    let mut column = 0_usize;
    for _ in 0..lead {
      write!(out, "{:7}", "")?;
      column += 1;
    }

    for cell in cells {
      let dots = "*".repeat(cell.colors.len());
      let label = format!(
        "{:>2}{:<3}",
        cell.date.day(),
        dots
      );
      let label = if cell.is_today {
        self.paint(&label, "7")
      } else {
        label
      };
      write!(out, "{label}  ")?;
      column += 1;
      if column == 7 {
        writeln!(out)?;
        column = 0;
      }
    }
    if column != 0 {
      writeln!(out)?;
    }

    Ok(())
  }

  #[tracing::instrument(skip(
    self, rules, planned
  ))]
  pub fn print_reminders(
    &mut self,
    rules: &[ReminderRule],
    planned: &[PlannedReminder]
  ) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    let headers = vec![
      "ID".to_string(),
      "Content".to_string(),
      "Times".to_string(),
      "Days".to_string(),
      "Active".to_string(),
      "Next".to_string(),
    ];

    let rows = rules
      .iter()
      .map(|rule| {
        let next = planned
          .iter()
          .find(|p| p.rule_id == rule.id)
          .map(|p| {
            self.when(p.fire_at)
          })
          .unwrap_or_default();
        vec![
          self.paint(&short_id(&rule.id), "33"),
          rule.kind.to_string(),
          rule.times.join(","),
          rule.weekdays.short_names(),
          if rule.active {
            "yes".to_string()
          } else {
            "no".to_string()
          },
          next,
        ]
      })
      .collect();

    write_table(&mut out, headers, rows)
  }

  fn paint(
    &self,
    text: &str,
    code: &str
  ) -> String {
    if !self.color
      || !io::stdout().is_terminal()
    {
      return text.to_string();
    }
    format!("\x1b[{code}m{text}\x1b[0m")
  }
}

fn short_id(id: &str) -> String {
  id.chars().take(8).collect()
}

fn recurrence_summary(
  event: &EventTemplate
) -> String {
  let mut text = match event.recurrence {
    | Recurrence::SpecificWeekdays => {
      format!(
        "weekdays {}",
        event.weekdays.short_names()
      )
    }
    | other => other.to_string()
  };
  if event.recurrence.is_recurring()
    && let Some(until) =
      event.recurrence_until
  {
    text.push_str(&format!(" until {until}"));
  }
  text
}

fn write_table<W: Write>(
  mut writer: W,
  headers: Vec<String>,
  rows: Vec<Vec<String>>
) -> anyhow::Result<()> {
  let column_count = headers.len();
  let mut widths = vec![0usize; column_count];

  for (idx, header) in
    headers.iter().enumerate()
  {
    widths[idx] = widths[idx].max(
      UnicodeWidthStr::width(
        header.as_str()
      )
    );
  }

  for row in &rows {
    for (idx, cell) in
      row.iter().enumerate()
    {
      widths[idx] = widths[idx].max(
        UnicodeWidthStr::width(
          strip_ansi(cell).as_str()
        )
      );
    }
  }

  for idx in 0..column_count {
    write!(
      writer,
      "{:width$} ",
      headers[idx],
      width = widths[idx]
    )?;
  }
  writeln!(writer)?;

  for width in &widths {
    write!(
      writer,
      "{:-<width$} ",
      "",
      width = *width
    )?;
  }
  writeln!(writer)?;

  for row in rows {
    for idx in 0..column_count {
      let cell = &row[idx];
      let visible_width =
        UnicodeWidthStr::width(
          strip_ansi(cell).as_str()
        );
      let padding = widths[idx]
        .saturating_sub(visible_width);
      write!(
        writer,
        "{}{} ",
        cell,
        " ".repeat(padding)
      )?;
    }
    writeln!(writer)?;
  }

  Ok(())
}

fn strip_ansi(s: &str) -> String {
  let mut out =
    String::with_capacity(s.len());
  let mut escaped = false;

  for ch in s.chars() {
    if escaped {
      if ch == 'm' {
        escaped = false;
      }
      continue;
    }

    if ch == '\x1b' {
      escaped = true;
      continue;
    }

    out.push(ch);
  }

  out
}
