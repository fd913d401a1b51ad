//! Configuration loading and validation

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;

use crate::error::{Error, Result};

/// Settings for the accounts core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Hours after a claim before the daily chance becomes available again
    pub daily_chance_window_hours: i64,
    pub clearance_min: i32,
    pub clearance_max: i32,
    /// Role given to regular users saved without one
    pub default_role: RoleSettings,
    /// Role given to admins and superusers saved without one
    pub staff_role: RoleSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSettings {
    pub title: String,
    pub desc: String,
    pub clearance: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daily_chance_window_hours: 24,
            clearance_min: 0,
            clearance_max: 10,
            default_role: RoleSettings {
                title: "user".to_string(),
                desc: "User".to_string(),
                clearance: 0,
            },
            staff_role: RoleSettings {
                title: "staff".to_string(),
                desc: "Basic staff role. No extended authorizations granted".to_string(),
                clearance: 1,
            },
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the optional file, then `ACCOUNTS__*`
    /// environment variables (e.g. `ACCOUNTS__DAILY_CHANCE_WINDOW_HOURS=12`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Defaults go in as the lowest source, so a file may set only part
        // of a nested role table
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("ACCOUNTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.daily_chance_window_hours <= 0 {
            return Err(Error::Config(format!(
                "daily_chance_window_hours must be positive, got {}",
                self.daily_chance_window_hours
            )));
        }

        if self.clearance_min > self.clearance_max {
            return Err(Error::Config(format!(
                "clearance_min ({}) exceeds clearance_max ({})",
                self.clearance_min, self.clearance_max
            )));
        }

        for role in [&self.default_role, &self.staff_role] {
            if role.title.trim().is_empty() {
                return Err(Error::Config("role title must not be empty".to_string()));
            }
        }

        Ok(())
    }

    pub fn daily_chance_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.daily_chance_window_hours)
    }

    pub fn clearance_bounds(&self) -> RangeInclusive<i32> {
        self.clearance_min..=self.clearance_max
    }
}
