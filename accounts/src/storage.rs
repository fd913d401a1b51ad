use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::role::Role;
use crate::types::{Balance, Currency};
use crate::user::User;
use crate::wallet::Wallet;

/// Persistence collaborator for users, roles and wallets.
///
/// Lookups fail with `Error::NotFound` when the key does not exist.
pub trait Storage: Send + Sync {
    fn get_user(&self, username: &str) -> Result<User>;
    fn get_user_by_email(&self, email: &str) -> Result<User>;
    /// Inserts a new user, failing if the username or email is taken
    fn insert_user(&self, user: &User) -> Result<()>;
    /// Overwrites an existing user
    fn save_user(&self, user: &User) -> Result<()>;
    /// All users ordered by username
    fn all_users(&self) -> Result<Vec<User>>;
    /// Adds each user to the other's friend set in one step
    fn link_friends(&self, username: &str, other: &str) -> Result<()>;

    fn get_role(&self, title: &str) -> Result<Role>;
    /// Creates the role unless one with the same title exists, and returns
    /// the stored role either way
    fn create_role(&self, role: &Role) -> Result<Role>;
    fn save_role(&self, role: &Role) -> Result<()>;

    fn get_wallet(&self, owner: &str) -> Result<Wallet>;
    /// Creates an empty wallet unless one exists for `owner`, and returns
    /// the stored wallet either way
    fn create_wallet(&self, owner: &str) -> Result<Wallet>;
    fn save_wallet(&self, wallet: &Wallet) -> Result<()>;
    /// Atomic read-modify-write of one balance
    fn adjust(&self, owner: &str, amount: i64, currency: Currency) -> Result<i64>;
    /// Atomic transfer between two wallets; returns (sender, receiver) balances
    fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
        currency: Currency,
    ) -> Result<(Balance, Balance)>;
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Storage(format!("{} lock poisoned", what)))
}

// Simple in-memory storage implementation.
// Each wallet sits behind its own mutex so transfers lock only the two rows
// they touch.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    users: Arc<Mutex<HashMap<String, User>>>,
    roles: Arc<Mutex<HashMap<String, Role>>>,
    wallets: Arc<Mutex<HashMap<String, Arc<Mutex<Wallet>>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role_count(&self) -> Result<usize> {
        Ok(lock(&self.roles, "role table")?.len())
    }

    pub fn wallet_count(&self) -> Result<usize> {
        Ok(lock(&self.wallets, "wallet table")?.len())
    }

    fn wallet_row(&self, owner: &str) -> Result<Arc<Mutex<Wallet>>> {
        let wallets = lock(&self.wallets, "wallet table")?;
        wallets
            .get(owner)
            .cloned()
            .ok_or_else(|| Error::not_found("wallet", owner))
    }
}

impl Storage for InMemoryStorage {
    fn get_user(&self, username: &str) -> Result<User> {
        let users = lock(&self.users, "user table")?;
        users
            .get(username)
            .cloned()
            .ok_or_else(|| Error::not_found("user", username))
    }

    fn get_user_by_email(&self, email: &str) -> Result<User> {
        let users = lock(&self.users, "user table")?;
        users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or_else(|| Error::not_found("user", email))
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        let mut users = lock(&self.users, "user table")?;

        if users.contains_key(&user.username) {
            return Err(Error::UsernameTaken(user.username.clone()));
        }
        if users.values().any(|other| other.email == user.email) {
            return Err(Error::EmailTaken(user.email.clone()));
        }

        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    fn save_user(&self, user: &User) -> Result<()> {
        let mut users = lock(&self.users, "user table")?;

        if !users.contains_key(&user.username) {
            return Err(Error::not_found("user", user.username.as_str()));
        }
        if users
            .values()
            .any(|other| other.username != user.username && other.email == user.email)
        {
            return Err(Error::EmailTaken(user.email.clone()));
        }

        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    fn all_users(&self) -> Result<Vec<User>> {
        let users = lock(&self.users, "user table")?;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(all)
    }

    fn link_friends(&self, username: &str, other: &str) -> Result<()> {
        let mut users = lock(&self.users, "user table")?;

        for name in [username, other] {
            if !users.contains_key(name) {
                return Err(Error::not_found("user", name));
            }
        }

        if let Some(user) = users.get_mut(username) {
            user.friends.insert(other.to_string());
        }
        if let Some(user) = users.get_mut(other) {
            user.friends.insert(username.to_string());
        }
        Ok(())
    }

    fn get_role(&self, title: &str) -> Result<Role> {
        let roles = lock(&self.roles, "role table")?;
        roles
            .get(title)
            .cloned()
            .ok_or_else(|| Error::not_found("role", title))
    }

    fn create_role(&self, role: &Role) -> Result<Role> {
        let mut roles = lock(&self.roles, "role table")?;
        let stored = roles
            .entry(role.title.clone())
            .or_insert_with(|| role.clone());
        Ok(stored.clone())
    }

    fn save_role(&self, role: &Role) -> Result<()> {
        let mut roles = lock(&self.roles, "role table")?;
        roles.insert(role.title.clone(), role.clone());
        Ok(())
    }

    fn get_wallet(&self, owner: &str) -> Result<Wallet> {
        let row = self.wallet_row(owner)?;
        let wallet = lock(&row, "wallet")?;
        Ok(wallet.clone())
    }

    fn create_wallet(&self, owner: &str) -> Result<Wallet> {
        let row = {
            let mut wallets = lock(&self.wallets, "wallet table")?;
            wallets
                .entry(owner.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Wallet::new(owner))))
                .clone()
        };
        let wallet = lock(&row, "wallet")?;
        Ok(wallet.clone())
    }

    fn save_wallet(&self, wallet: &Wallet) -> Result<()> {
        let row = {
            let mut wallets = lock(&self.wallets, "wallet table")?;
            wallets
                .entry(wallet.owner.clone())
                .or_insert_with(|| Arc::new(Mutex::new(wallet.clone())))
                .clone()
        };
        *lock(&row, "wallet")? = wallet.clone();
        Ok(())
    }

    fn adjust(&self, owner: &str, amount: i64, currency: Currency) -> Result<i64> {
        let row = self.wallet_row(owner)?;
        let mut wallet = lock(&row, "wallet")?;
        wallet.adjust(amount, currency)
    }

    fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
        currency: Currency,
    ) -> Result<(Balance, Balance)> {
        let sender_row = self.wallet_row(from)?;
        // Moving currency to oneself changes nothing
        if from == to {
            let balance = lock(&sender_row, "wallet")?.balance();
            return Ok((balance, balance));
        }

        let receiver_row = self.wallet_row(to).map_err(|e| {
            if e.is_not_found() {
                Error::InvalidTarget(to.to_string())
            } else {
                e
            }
        })?;

        // Rows are always locked in owner order so that two transfers running
        // in opposite directions cannot deadlock
        let (mut sender, mut receiver) = if from < to {
            let sender = lock(&sender_row, "wallet")?;
            let receiver = lock(&receiver_row, "wallet")?;
            (sender, receiver)
        } else {
            let receiver = lock(&receiver_row, "wallet")?;
            let sender = lock(&sender_row, "wallet")?;
            (sender, receiver)
        };

        sender.send(&mut receiver, amount, currency)?;
        Ok((sender.balance(), receiver.balance()))
    }
}
