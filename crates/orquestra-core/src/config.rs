//! Agenda settings.
//!
//! The rc file is TOML. Every setting also
//! has a dotted name (`calendar.dots`,
//! `timezone`) accepted by `rc.KEY=VALUE`
//! and `--rc KEY=VALUE` overrides:
//!
//! ```toml
//! timezone = "America/Sao_Paulo"
//! color = "off"
//!
//! [data]
//! location = "~/agenda"
//!
//! [calendar]
//! max_occurrences = 730
//! dots = 2
//! ```

use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow,
  bail
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Deserializer
};
use tracing::{
  debug,
  info,
  warn
};

use crate::agenda::{
  DEFAULT_CALENDAR_DOTS,
  DEFAULT_CALENDAR_MAX_OCCURRENCES,
  DEFAULT_UPCOMING_DAYS,
  DEFAULT_UPCOMING_LIMIT,
  DEFAULT_UPCOMING_MAX_OCCURRENCES
};

const RC_ENV_VAR: &str = "ORQUESTRARC";
const RC_FILE_NAME: &str = ".orquestrarc";
const TIMEZONE_ENV_VAR: &str =
  "ORQUESTRA_TIMEZONE";
const DEFAULT_DATA_DIR: &str =
  ".orquestra";
pub const DEFAULT_TIMEZONE: Tz =
  chrono_tz::America::Sao_Paulo;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  #[serde(deserialize_with = "timezone_setting")]
  pub timezone:    Tz,
  #[serde(deserialize_with = "switch_setting")]
  pub color:       bool,
  pub data:        DataSettings,
  pub default:     DefaultSettings,
  pub calendar:    CalendarSettings,
  pub upcoming:    UpcomingSettings,
  #[serde(skip)]
  pub loaded_from: Option<PathBuf>
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSettings {
  /// `None` means `~/.orquestra`.
  pub location: Option<PathBuf>
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultSettings {
  pub command: String
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalendarSettings {
  pub max_occurrences: usize,
  pub dots:            usize
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpcomingSettings {
  pub days:            i64,
  pub max_occurrences: usize,
  pub limit:           usize
}

impl Default for Config {
  fn default() -> Self {
    Self {
      timezone:    DEFAULT_TIMEZONE,
      color:       true,
      data:        DataSettings::default(),
      default:     DefaultSettings::default(),
      calendar:    CalendarSettings::default(),
      upcoming:    UpcomingSettings::default(),
      loaded_from: None
    }
  }
}

impl Default for DefaultSettings {
  fn default() -> Self {
    Self {
      command: "upcoming".to_string()
    }
  }
}

impl Default for CalendarSettings {
  fn default() -> Self {
    Self {
      max_occurrences:
        DEFAULT_CALENDAR_MAX_OCCURRENCES,
      dots: DEFAULT_CALENDAR_DOTS
    }
  }
}

impl Default for UpcomingSettings {
  fn default() -> Self {
    Self {
      days:            DEFAULT_UPCOMING_DAYS,
      max_occurrences:
        DEFAULT_UPCOMING_MAX_OCCURRENCES,
      limit:           DEFAULT_UPCOMING_LIMIT
    }
  }
}

impl Config {
  /// Defaults, then the rc file, then
  /// `ORQUESTRA_TIMEZONE`.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = match resolve_rc_path(
      rc_override
    ) {
      | Some(path) => Self::from_file(&path)?,
      | None => {
        debug!(
          "no orquestrarc found; using \
           defaults"
        );
        Self::default()
      }
    };

    if let Ok(raw) =
      std::env::var(TIMEZONE_ENV_VAR)
      && !raw.trim().is_empty()
    {
      cfg.timezone = parse_timezone(&raw)
        .with_context(|| {
          format!("invalid {TIMEZONE_ENV_VAR}")
        })?;
      info!(timezone = %cfg.timezone, "timezone set from environment");
    }

    Ok(cfg)
  }

  #[tracing::instrument]
  pub fn from_file(
    path: &Path
  ) -> anyhow::Result<Self> {
    let path = expand_tilde(path);
    info!(rc = %path.display(), "loading orquestrarc");
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    let mut cfg: Self =
      toml::from_str(&text).with_context(
        || {
          format!(
            "invalid settings in {}",
            path.display()
          )
        }
      )?;
    cfg.loaded_from = Some(path);
    Ok(cfg)
  }

  /// Applies `KEY=VALUE` overrides in
  /// order. A leading `rc.` is ignored.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key =
        k.strip_prefix("rc.").unwrap_or(&k);
      debug!(key, value = %v, "applying override");
      self.set(key, &v)?;
    }
    Ok(())
  }

  pub fn set(
    &mut self,
    key: &str,
    value: &str
  ) -> anyhow::Result<()> {
    let value = value.trim();
    match key {
      | "timezone" => {
        self.timezone = parse_timezone(value)?;
      }
      | "color" => {
        self.color = parse_switch(value)?;
      }
      | "data.location" => {
        self.data.location =
          (!value.is_empty())
            .then(|| PathBuf::from(value));
      }
      | "default.command" => {
        if value.is_empty() {
          bail!(
            "default.command cannot be \
             empty"
          );
        }
        self.default.command =
          value.to_string();
      }
      | "calendar.max_occurrences" => {
        self.calendar.max_occurrences =
          parse_number(key, value)?;
      }
      | "calendar.dots" => {
        self.calendar.dots =
          parse_number(key, value)?;
      }
      | "upcoming.days" => {
        self.upcoming.days =
          parse_number(key, value)?;
      }
      | "upcoming.max_occurrences" => {
        self.upcoming.max_occurrences =
          parse_number(key, value)?;
      }
      | "upcoming.limit" => {
        self.upcoming.limit =
          parse_number(key, value)?;
      }
      | other => {
        bail!("unknown setting: {other}")
      }
    }
    Ok(())
  }

  /// Effective settings by dotted name.
  pub fn entries(
    &self
  ) -> Vec<(&'static str, String)> {
    vec![
      (
        "calendar.dots",
        self.calendar.dots.to_string()
      ),
      (
        "calendar.max_occurrences",
        self
          .calendar
          .max_occurrences
          .to_string()
      ),
      (
        "color",
        (if self.color { "on" } else { "off" })
          .to_string()
      ),
      (
        "data.location",
        self
          .data
          .location
          .as_ref()
          .map(|p| p.display().to_string())
          .unwrap_or_else(|| {
            format!("~/{DEFAULT_DATA_DIR}")
          })
      ),
      (
        "default.command",
        self.default.command.clone()
      ),
      ("timezone", self.timezone.to_string()),
      (
        "upcoming.days",
        self.upcoming.days.to_string()
      ),
      (
        "upcoming.limit",
        self.upcoming.limit.to_string()
      ),
      (
        "upcoming.max_occurrences",
        self
          .upcoming
          .max_occurrences
          .to_string()
      ),
    ]
  }
}

/// `--data`, then `data.location`, then
/// `~/.orquestra`. Created when missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    override_dir,
    &cfg.data.location
  ) {
    | (Some(path), _) => path.to_path_buf(),
    | (None, Some(location)) => {
      expand_tilde(location)
    }
    | (None, None) => {
      dirs::home_dir()
        .ok_or_else(|| {
          anyhow!(
            "cannot determine home \
             directory"
          )
        })?
        .join(DEFAULT_DATA_DIR)
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

/// `--orquestrarc`, then `ORQUESTRARC`
/// (`/dev/null` disables the file), then
/// `~/.orquestrarc` when present.
fn resolve_rc_path(
  override_path: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = override_path {
    return Some(path.to_path_buf());
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    return (rc_env != "/dev/null")
      .then(|| PathBuf::from(rc_env));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping orquestrarc"
    );
    return None;
  };
  let candidate = home.join(RC_FILE_NAME);
  candidate.exists().then_some(candidate)
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  if let Ok(rest) = path.strip_prefix("~")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  raw.trim().parse::<Tz>().map_err(
    |err| {
      anyhow!(
        "unknown timezone {:?}: {err}",
        raw.trim()
      )
    }
  )
}

fn parse_switch(
  raw: &str
) -> anyhow::Result<bool> {
  match raw
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "on" | "yes" | "true" | "1" => {
      Ok(true)
    }
    | "off" | "no" | "false" | "0" => {
      Ok(false)
    }
    | other => {
      Err(anyhow!(
        "invalid on/off value: {other}"
      ))
    }
  }
}

fn parse_number<T>(
  key: &str,
  raw: &str
) -> anyhow::Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display
{
  raw.parse::<T>().map_err(|err| {
    anyhow!(
      "invalid value for {key}: {raw} \
       ({err})"
    )
  })
}

fn timezone_setting<'de, D>(
  deserializer: D
) -> Result<Tz, D::Error>
where
  D: Deserializer<'de>
{
  let raw = String::deserialize(deserializer)?;
  parse_timezone(&raw)
    .map_err(serde::de::Error::custom)
}

/// `color = false` and `color = "off"`
/// both work.
fn switch_setting<'de, D>(
  deserializer: D
) -> Result<bool, D::Error>
where
  D: Deserializer<'de>
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Switch {
    Flag(bool),
    Word(String)
  }

  match Switch::deserialize(deserializer)? {
    | Switch::Flag(flag) => Ok(flag),
    | Switch::Word(word) => {
      parse_switch(&word)
        .map_err(serde::de::Error::custom)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::PathBuf;

  use super::{
    Config,
    DEFAULT_TIMEZONE
  };

  fn write_rc(
    dir: &tempfile::TempDir,
    text: &str
  ) -> PathBuf {
    let rc = dir.path().join("orquestrarc");
    fs::write(&rc, text).expect("write rc");
    rc
  }

  #[test]
  fn rc_file_fills_typed_settings() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let rc = write_rc(
      &dir,
      "# agenda settings\n\
       timezone = \"Europe/Lisbon\"\n\
       color = \"off\"\n\
       \n\
       [calendar]\n\
       dots = 2\n\
       \n\
       [upcoming]\n\
       limit = 8\n"
    );

    let cfg =
      Config::from_file(&rc).expect("load");
    assert_eq!(
      cfg.timezone,
      chrono_tz::Europe::Lisbon
    );
    assert!(!cfg.color);
    assert_eq!(cfg.calendar.dots, 2);
    assert_eq!(
      cfg.calendar.max_occurrences,
      Config::default()
        .calendar
        .max_occurrences
    );
    assert_eq!(cfg.upcoming.limit, 8);
    assert_eq!(cfg.upcoming.days, 30);
    assert_eq!(cfg.default.command, "upcoming");
    assert_eq!(cfg.loaded_from, Some(rc));
  }

  #[test]
  fn rc_file_rejects_unknown_keys_and_bad_values()
  {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let rc = write_rc(
      &dir,
      "[calendar]\nstripes = 2\n"
    );
    assert!(Config::from_file(&rc).is_err());

    let rc =
      write_rc(&dir, "color = \"maybe\"\n");
    assert!(Config::from_file(&rc).is_err());

    let rc = write_rc(
      &dir,
      "timezone = \"Mars/Olympus\"\n"
    );
    assert!(Config::from_file(&rc).is_err());
  }

  #[test]
  fn overrides_are_typed() {
    let mut cfg = Config::default();
    assert_eq!(cfg.timezone, DEFAULT_TIMEZONE);

    cfg
      .apply_overrides([
        (
          "rc.calendar.max_occurrences".to_string(),
          "12".to_string()
        ),
        ("color".to_string(), "no".to_string()),
        (
          "timezone".to_string(),
          "UTC".to_string()
        )
      ])
      .expect("apply overrides");
    assert_eq!(cfg.calendar.max_occurrences, 12);
    assert!(!cfg.color);
    assert_eq!(cfg.timezone, chrono_tz::UTC);

    assert!(
      cfg
        .apply_overrides([(
          "rc.upcoming.limit".to_string(),
          "oops".to_string()
        )])
        .is_err()
    );
    assert!(
      cfg.set("calendar.stripes", "1").is_err()
    );
    assert!(
      cfg.set("default.command", " ").is_err()
    );
  }

  #[test]
  fn entries_show_effective_values() {
    let mut cfg = Config::default();
    cfg.set("upcoming.days", "7").expect("set");
    let entries = cfg.entries();
    assert!(
      entries
        .iter()
        .any(|(k, v)| *k == "upcoming.days" && v == "7")
    );
    assert!(entries.iter().any(|(k, v)| {
      *k == "timezone" && v == "America/Sao_Paulo"
    }));
    assert!(
      entries
        .windows(2)
        .all(|pair| pair[0].0 < pair[1].0)
    );
  }
}
