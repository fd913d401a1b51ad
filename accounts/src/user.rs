use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::daily_chance::{DailyChance, DailyChanceMode, DailyChanceState};
use crate::password::{hash_password, verify_password};

/// A registered account.
///
/// `role` and `wallet` hold the keys of the shared role (its title) and of the
/// owned wallet (its owner). Both are `None` only until the first save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub role: Option<String>,
    pub wallet: Option<String>,
    pub daily_chance: DailyChance,
    pub online: bool,
    pub is_admin: bool,
    pub is_active: bool,
    pub joined_on: NaiveDate,
    pub display_full_name: bool,
    /// Usernames of befriended users
    pub friends: BTreeSet<String>,
}

impl User {
    /// Builds an unsaved user with normalized username and email
    pub fn new(email: &str, username: &str, now: DateTime<Utc>) -> Self {
        User {
            username: Self::normalize_username(username),
            email: Self::normalize_email(email),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            date_of_birth: None,
            role: None,
            wallet: None,
            daily_chance: DailyChance::new(now),
            online: false,
            is_admin: false,
            is_active: true,
            joined_on: now.date_naive(),
            display_full_name: false,
            friends: BTreeSet::new(),
        }
    }

    /// An email passed as username keeps only the part before '@'
    pub fn normalize_username(username: &str) -> String {
        match username.split_once('@') {
            Some((name, _)) => name.to_string(),
            None => username.to_string(),
        }
    }

    /// Lowercases the domain part of an email address
    pub fn normalize_email(email: &str) -> String {
        match email.rsplit_once('@') {
            Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
            None => email.to_string(),
        }
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_hash = hash_password(password);
    }

    pub fn check_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }

    /// All admins are staff
    pub fn is_staff(&self) -> bool {
        self.is_admin
    }

    pub fn is_provisioned(&self) -> bool {
        self.role.is_some() && self.wallet.is_some()
    }

    pub fn has_daily_chance(&self) -> bool {
        self.daily_chance.available
    }

    pub fn set_daily_chance(
        &mut self,
        mode: DailyChanceMode,
        now: DateTime<Utc>,
        window: Duration,
    ) -> DailyChanceState {
        self.daily_chance.apply(mode, now, window)
    }

    pub fn has_friend(&self, username: &str) -> bool {
        self.friends.contains(username)
    }

    /// Case-insensitive substring match on the username
    pub fn username_matches(&self, term: &str) -> bool {
        self.username.to_lowercase().contains(&term.to_lowercase())
    }

    /// Like `username_matches`, but on the first name, and only when the user
    /// shows their full name
    pub fn first_name_matches(&self, term: &str) -> bool {
        self.display_full_name && self.first_name.to_lowercase().contains(&term.to_lowercase())
    }
}
