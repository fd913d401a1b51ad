use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::config::RoleSettings;
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Named permission tier shared by many users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub title: String,
    pub desc: String,
    /// Intended range 0..=10, not enforced here
    pub clearance: i32,
}

/// Outcome of a clearance query: the raw level when no threshold was given,
/// otherwise whether the threshold is met
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Clearance {
    Level(i32),
    Granted(bool),
}

impl Default for Role {
    fn default() -> Self {
        Role {
            title: String::new(),
            desc: String::new(),
            clearance: 1,
        }
    }
}

impl Role {
    pub fn new(title: impl Into<String>, desc: impl Into<String>, clearance: i32) -> Self {
        Role {
            title: title.into(),
            desc: desc.into(),
            clearance,
        }
    }

    pub fn normalize_title(title: &str) -> String {
        title.to_lowercase()
    }

    /// Lowercases the title and persists the role
    pub fn save<S: Storage + ?Sized>(&mut self, storage: &S) -> Result<()> {
        self.title = Self::normalize_title(&self.title);
        storage.save_role(self)
    }

    pub fn get_clearance(
        &self,
        required: Option<i32>,
        bounds: RangeInclusive<i32>,
    ) -> Result<Clearance> {
        match required {
            None => Ok(Clearance::Level(self.clearance)),
            Some(required) if bounds.contains(&required) => {
                Ok(Clearance::Granted(self.clearance >= required))
            }
            Some(required) => Err(Error::OutOfRange {
                required,
                min: *bounds.start(),
                max: *bounds.end(),
            }),
        }
    }
}

impl From<&RoleSettings> for Role {
    fn from(settings: &RoleSettings) -> Self {
        Role::new(
            settings.title.as_str(),
            settings.desc.as_str(),
            settings.clearance,
        )
    }
}

/// Looks the role up by its normalized title and creates it only when it is
/// missing. Safe to call any number of times.
pub fn ensure_role<S: Storage + ?Sized>(storage: &S, template: &RoleSettings) -> Result<Role> {
    let title = Role::normalize_title(&template.title);
    match storage.get_role(&title) {
        Ok(role) => Ok(role),
        Err(e) if e.is_not_found() => {
            let mut role = Role::from(template);
            role.title = title;
            let role = storage.create_role(&role)?;
            tracing::info!(
                "Created role '{}' with clearance {}",
                role.title,
                role.clearance
            );
            Ok(role)
        }
        Err(e) => Err(e),
    }
}
