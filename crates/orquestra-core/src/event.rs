use std::collections::{
  BTreeMap,
  BTreeSet
};
use std::fmt;
use std::str::FromStr;

use anyhow::{
  anyhow,
  bail
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Deserializer,
  Serialize,
  Serializer
};
use uuid::Uuid;

use crate::datetime::{
  date_bound_serde,
  parse_weekday_name,
  to_local_date
};

pub const DEFAULT_EVENT_COLOR: &str =
  "#6366F1";

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  Default
)]
pub enum Recurrence {
  #[default]
  #[serde(rename = "nenhuma", alias = "none")]
  None,
  #[serde(rename = "diaria", alias = "daily")]
  Daily,
  #[serde(rename = "semanal", alias = "weekly")]
  Weekly,
  #[serde(
    rename = "dias_especificos",
    alias = "specific_weekdays"
  )]
  SpecificWeekdays,
  #[serde(rename = "mensal", alias = "monthly")]
  Monthly
}

impl Recurrence {
  pub fn is_recurring(self) -> bool {
    self != Recurrence::None
  }

  pub fn label(self) -> &'static str {
    match self {
      | Recurrence::None => "once",
      | Recurrence::Daily => "daily",
      | Recurrence::Weekly => "weekly",
      | Recurrence::SpecificWeekdays => {
        "weekdays"
      }
      | Recurrence::Monthly => "monthly"
    }
  }
}

impl fmt::Display for Recurrence {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for Recurrence {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "none" | "nenhuma" | "once"
      | "no" => Ok(Recurrence::None),
      | "daily" | "diaria" | "day" => {
        Ok(Recurrence::Daily)
      }
      | "weekly" | "semanal" | "week" => {
        Ok(Recurrence::Weekly)
      }
      | "specific_weekdays"
      | "dias_especificos"
      | "weekdays"
      | "days" => {
        Ok(Recurrence::SpecificWeekdays)
      }
      | "monthly" | "mensal" | "month" => {
        Ok(Recurrence::Monthly)
      }
      | other => {
        Err(anyhow!(
          "unknown recurrence: {other} \
           (expected none, daily, \
           weekly, weekdays or monthly)"
        ))
      }
    }
  }
}

/// Weekday numbers, 0 = Sunday through
/// 6 = Saturday.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Default
)]
pub struct WeekdaySet(BTreeSet<u8>);

impl WeekdaySet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_numbers<I>(
    numbers: I
  ) -> anyhow::Result<Self>
  where
    I: IntoIterator<Item = u8>
  {
    let mut set = BTreeSet::new();
    for number in numbers {
      if number > 6 {
        bail!(
          "weekday number out of \
           range 0..=6: {number}"
        );
      }
      set.insert(number);
    }
    Ok(Self(set))
  }

  pub fn insert(
    &mut self,
    weekday: Weekday
  ) {
    self.0.insert(
      weekday.num_days_from_sunday()
        as u8
    );
  }

  pub fn contains(
    &self,
    weekday: Weekday
  ) -> bool {
    self.0.contains(
      &(weekday.num_days_from_sunday()
        as u8)
    )
  }

  pub fn contains_date(
    &self,
    date: NaiveDate
  ) -> bool {
    self.contains(date.weekday())
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn numbers(
    &self
  ) -> impl Iterator<Item = u8> + '_ {
    self.0.iter().copied()
  }

  pub fn short_names(&self) -> String {
    const NAMES: [&str; 7] = [
      "Sun", "Mon", "Tue", "Wed", "Thu",
      "Fri", "Sat"
    ];
    self
      .0
      .iter()
      .map(|n| NAMES[*n as usize])
      .collect::<Vec<_>>()
      .join(",")
  }
}

impl FromStr for WeekdaySet {
  type Err = anyhow::Error;

  /// Comma separated names (`mon,wed`)
  /// or numbers (`1,3`).
  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let mut set = WeekdaySet::new();
    for raw in s.split(',') {
      let token =
        raw.trim().to_ascii_lowercase();
      if token.is_empty() {
        continue;
      }
      if let Ok(number) =
        token.parse::<u8>()
      {
        let parsed =
          WeekdaySet::from_numbers([
            number
          ])?;
        set.0.extend(parsed.0);
      } else if let Some(weekday) =
        parse_weekday_name(&token)
      {
        set.insert(weekday);
      } else {
        bail!(
          "unknown weekday: {token}"
        );
      }
    }
    Ok(set)
  }
}

impl Serialize for WeekdaySet {
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.collect_seq(self.0.iter())
  }
}

impl<'de> Deserialize<'de> for WeekdaySet {
  fn deserialize<D>(
    deserializer: D
  ) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw =
      Option::<Vec<u8>>::deserialize(
        deserializer
      )?;
    WeekdaySet::from_numbers(
      raw.unwrap_or_default()
    )
    .map_err(serde::de::Error::custom)
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq
)]
pub struct EventTemplate {
  pub id: String,

  #[serde(rename = "titulo")]
  pub title: String,

  #[serde(
    rename = "descricao",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description: Option<String>,

  #[serde(rename = "data_inicio")]
  pub start: DateTime<Utc>,

  #[serde(rename = "data_fim")]
  pub end: DateTime<Utc>,

  #[serde(
    rename = "local",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub location: Option<String>,

  #[serde(
    rename = "cor",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub color: Option<String>,

  #[serde(rename = "recorrencia", default)]
  pub recurrence: Recurrence,

  #[serde(rename = "dias_semana", default)]
  pub weekdays: WeekdaySet,

  #[serde(
    rename = "recorrencia_ate",
    default,
    with = "date_bound_serde"
  )]
  pub recurrence_until:
    Option<NaiveDate>,

  #[serde(flatten)]
  pub extra:
    BTreeMap<String, serde_json::Value>
}

impl EventTemplate {
  pub fn new(
    title: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>
  ) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      title,
      description: None,
      start,
      end,
      location: None,
      color: None,
      recurrence: Recurrence::None,
      weekdays: WeekdaySet::new(),
      recurrence_until: None,
      extra: BTreeMap::new()
    }
  }

  pub fn duration(&self) -> Duration {
    self.end - self.start
  }

  pub fn color_or_default(&self) -> &str {
    self
      .color
      .as_deref()
      .filter(|c| !c.trim().is_empty())
      .unwrap_or(DEFAULT_EVENT_COLOR)
  }

  /// Checks the invariants the event
  /// form enforces before a record is
  /// stored. The recurrence end is a
  /// calendar date in `tz`.
  pub fn validate(
    &self,
    tz: &Tz
  ) -> anyhow::Result<()> {
    if self.title.trim().is_empty() {
      bail!("event title is required");
    }
    if self.end <= self.start {
      bail!(
        "event end ({}) must be after \
         its start ({})",
        self.end.to_rfc3339(),
        self.start.to_rfc3339()
      );
    }
    if self.recurrence
      == Recurrence::SpecificWeekdays
      && self.weekdays.is_empty()
    {
      bail!(
        "specific-weekday recurrence \
         needs at least one weekday"
      );
    }
    if let Some(until) =
      self.recurrence_until
      && until < to_local_date(self.start, tz)
    {
      bail!(
        "recurrence end {until} is \
         before the first occurrence"
      );
    }
    Ok(())
  }
}

/// One materialized occurrence of an
/// [`EventTemplate`]. Never persisted.
#[derive(
  Debug, Clone, Serialize, PartialEq,
)]
pub struct EventInstance {
  #[serde(flatten)]
  pub event: EventTemplate,

  #[serde(rename = "isRecurring")]
  pub is_recurring: bool,

  #[serde(rename = "originalId")]
  pub original_id: String
}

impl EventInstance {
  pub fn id(&self) -> &str {
    &self.event.id
  }

  pub fn start(&self) -> DateTime<Utc> {
    self.event.start
  }

  pub fn end(&self) -> DateTime<Utc> {
    self.event.end
  }

  pub fn color(&self) -> &str {
    self.event.color_or_default()
  }
}
