use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::Settings;
use crate::daily_chance::{Clock, DailyChanceMode, DailyChanceState, SystemClock};
use crate::error::{Error, Result};
use crate::role::{Clearance, Role, ensure_role};
use crate::storage::Storage;
use crate::types::{Balance, Currency};
use crate::user::User;
use crate::wallet::{TransferRequest, parse_amount};

// New user request
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

/// Entry point for the operations a web layer invokes on accounts.
///
/// Every mutating call loads the entity, applies the change and persists it
/// through the storage collaborator before returning.
pub struct Accounts<S: Storage> {
    storage: S,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl<S: Storage> Accounts<S> {
    pub fn new(storage: S, settings: Settings) -> Self {
        Self::with_clock(storage, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: S, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        Accounts {
            storage,
            settings,
            clock,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ---- Users ----

    /// Creates and saves a user with a hashed password. A username given as an
    /// email address keeps only its local part.
    pub fn create_user(&self, new_user: &NewUser) -> Result<User> {
        self.build_and_insert(new_user, false)
    }

    /// Creates and saves an admin holding the staff role
    pub fn create_superuser(&self, new_user: &NewUser) -> Result<User> {
        self.build_and_insert(new_user, true)
    }

    fn build_and_insert(&self, new_user: &NewUser, is_admin: bool) -> Result<User> {
        if new_user.email.trim().is_empty() {
            return Err(Error::MissingEmail);
        }

        let mut user = User::new(&new_user.email, &new_user.username, self.clock.now());
        if user.username.trim().is_empty() {
            return Err(Error::MissingUsername);
        }
        if !self.username_available(&user.username)? {
            return Err(Error::UsernameTaken(user.username));
        }
        if !self.email_available(&user.email)? {
            return Err(Error::EmailTaken(user.email));
        }

        user.set_password(&new_user.password);
        user.date_of_birth = new_user.date_of_birth;
        user.is_admin = is_admin;

        self.provision(&mut user)?;
        self.storage.insert_user(&user)?;

        tracing::info!(
            "Created user {} with role {}",
            user.username,
            user.role.as_deref().unwrap_or_default()
        );
        Ok(user)
    }

    /// Resolves the role and wallet of a user before it is written, so a save
    /// is always a single write and never re-enters provisioning
    fn provision(&self, user: &mut User) -> Result<()> {
        if user.role.is_none() {
            let template = if user.is_admin {
                &self.settings.staff_role
            } else {
                &self.settings.default_role
            };
            let role = ensure_role(&self.storage, template)?;
            user.role = Some(role.title);
        }

        if user.wallet.is_none() {
            let wallet = match self.storage.get_wallet(&user.username) {
                Ok(wallet) => wallet,
                Err(e) if e.is_not_found() => {
                    let wallet = self.storage.create_wallet(&user.username)?;
                    tracing::info!("Created wallet for {}", wallet.owner);
                    wallet
                }
                Err(e) => return Err(e),
            };
            user.wallet = Some(wallet.owner);
        }

        Ok(())
    }

    /// Provisions missing role and wallet, then persists the user. A user not
    /// yet in storage is inserted.
    pub fn save_user(&self, user: &mut User) -> Result<()> {
        user.username = User::normalize_username(&user.username);
        self.provision(user)?;
        match self.storage.save_user(user) {
            Err(e) if e.is_not_found() => self.storage.insert_user(user),
            result => result,
        }
    }

    pub fn get_user(&self, username: &str) -> Result<User> {
        self.storage.get_user(username)
    }

    pub fn username_available(&self, username: &str) -> Result<bool> {
        match self.storage.get_user(username) {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub fn email_available(&self, email: &str) -> Result<bool> {
        match self.storage.get_user_by_email(&User::normalize_email(email)) {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    // ---- Sessions ----

    /// Verifies credentials, marks the user online and re-evaluates their
    /// daily chance. Unknown and inactive users get the same error as a wrong
    /// password.
    pub fn sign_in(&self, username: &str, password: &str) -> Result<User> {
        let mut user = match self.storage.get_user(username) {
            Ok(user) => user,
            Err(e) if e.is_not_found() => return Err(Error::InvalidCredentials),
            Err(e) => return Err(e),
        };
        if !user.is_active || !user.check_password(password) {
            tracing::warn!("Rejected sign in for {}", username);
            return Err(Error::InvalidCredentials);
        }

        user.online = true;
        user.set_daily_chance(
            DailyChanceMode::Reset,
            self.clock.now(),
            self.settings.daily_chance_window(),
        );
        self.save_user(&mut user)?;

        tracing::info!("User {} signed in", user.username);
        Ok(user)
    }

    pub fn sign_out(&self, username: &str) -> Result<User> {
        let mut user = self.storage.get_user(username)?;
        user.online = false;
        self.save_user(&mut user)?;
        tracing::info!("User {} signed out", user.username);
        Ok(user)
    }

    // ---- Roles & clearance ----

    pub fn role_of(&self, username: &str) -> Result<Role> {
        let mut user = self.storage.get_user(username)?;
        if user.role.is_none() {
            self.save_user(&mut user)?;
        }
        let title = user.role.unwrap_or_default();
        self.storage.get_role(&title)
    }

    /// Without `required`, returns the user's clearance level. With it,
    /// checks the bounds and returns whether the user's level meets it.
    pub fn get_clearance(&self, username: &str, required: Option<i32>) -> Result<Clearance> {
        self.role_of(username)?
            .get_clearance(required, self.settings.clearance_bounds())
    }

    pub fn has_clearance(&self, username: &str, required: i32) -> Result<bool> {
        match self.get_clearance(username, Some(required))? {
            Clearance::Granted(granted) => Ok(granted),
            Clearance::Level(level) => Ok(level >= required),
        }
    }

    // ---- Daily chance ----

    pub fn set_daily_chance(&self, username: &str, mode: DailyChanceMode) -> Result<DailyChanceState> {
        let mut user = self.storage.get_user(username)?;
        let state = user.set_daily_chance(
            mode,
            self.clock.now(),
            self.settings.daily_chance_window(),
        );
        self.save_user(&mut user)?;
        tracing::debug!("Daily chance of {} is now {:?}", username, state);
        Ok(state)
    }

    pub fn claim_daily_chance(&self, username: &str) -> Result<DailyChanceState> {
        self.set_daily_chance(username, DailyChanceMode::Claim)
    }

    // ---- Friends ----

    /// Befriends `other` on both sides. Returns false when `other` does not
    /// resolve to a user or is the user themself.
    pub fn add_friend(&self, username: &str, other: &str) -> Result<bool> {
        self.storage.get_user(username)?;
        if username == other {
            return Ok(false);
        }

        match self.storage.link_friends(username, other) {
            Ok(()) => {
                tracing::info!("{} and {} are now friends", username, other);
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_friends(&self, username: &str) -> Result<Vec<User>> {
        let user = self.storage.get_user(username)?;
        user.friends
            .iter()
            .map(|friend| self.storage.get_user(friend))
            .collect()
    }

    /// Searches usernames, and first names of users displaying their full
    /// name, for each `_`-separated term. Results are de-duplicated and keep
    /// first-seen order.
    pub fn search_users(&self, terms: &str, friends_of: Option<&str>) -> Result<Vec<User>> {
        let pool = match friends_of {
            Some(username) => self.get_friends(username)?,
            None => self.storage.all_users()?,
        };

        let mut matches: Vec<User> = Vec::new();
        for term in terms.split('_').filter(|term| !term.is_empty()) {
            let by_name = pool.iter().filter(|user| user.first_name_matches(term));
            let by_username = pool.iter().filter(|user| user.username_matches(term));

            for user in by_name.chain(by_username) {
                if !matches.iter().any(|m| m.username == user.username) {
                    matches.push(user.clone());
                }
            }
        }
        Ok(matches)
    }

    // ---- Wallets ----

    fn wallet_owner(&self, username: &str) -> Result<String> {
        let mut user = self.storage.get_user(username)?;
        if user.wallet.is_none() {
            self.save_user(&mut user)?;
        }
        Ok(user.wallet.unwrap_or(user.username))
    }

    pub fn balance_of(&self, username: &str) -> Result<Balance> {
        let owner = self.wallet_owner(username)?;
        Ok(self.storage.get_wallet(&owner)?.balance())
    }

    pub fn adjust(&self, username: &str, amount: i64, currency: Currency) -> Result<i64> {
        let owner = self.wallet_owner(username)?;
        let balance = self.storage.adjust(&owner, amount, currency)?;
        tracing::info!("Adjusted {} of {} by {}", currency, owner, amount);
        Ok(balance)
    }

    /// Sends currency from one user's wallet to another's as one atomic step.
    /// The currency name is matched case-insensitively.
    pub fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
        currency: &str,
    ) -> Result<(Balance, Balance)> {
        let currency: Currency = currency.parse()?;
        let sender = self.wallet_owner(from)?;
        let receiver = match self.wallet_owner(to) {
            Ok(owner) => owner,
            Err(e) if e.is_not_found() => return Err(Error::InvalidTarget(to.to_string())),
            Err(e) => return Err(e),
        };

        match self.storage.transfer(&sender, &receiver, amount, currency) {
            Ok(balances) => {
                tracing::info!(
                    "Transferred {} {} from {} to {}",
                    amount,
                    currency,
                    sender,
                    receiver
                );
                Ok(balances)
            }
            Err(e) => {
                tracing::warn!("Transfer from {} to {} rejected: {}", sender, receiver, e);
                Err(e)
            }
        }
    }

    /// Transfer from a raw request body
    pub fn send(&self, from: &str, request: &TransferRequest) -> Result<(Balance, Balance)> {
        let amount = parse_amount(&request.amount)?;
        self.transfer(from, &request.to, amount, &request.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daily_chance::FixedClock;
    use crate::storage::InMemoryStorage;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn accounts_at(at: DateTime<Utc>, storage: InMemoryStorage) -> Accounts<InMemoryStorage> {
        Accounts::with_clock(storage, Settings::default(), Arc::new(FixedClock(at)))
    }

    fn new_user(email: &str, username: &str, password: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            date_of_birth: None,
        }
    }

    fn setup_accounts() -> Accounts<InMemoryStorage> {
        let accounts = accounts_at(now(), InMemoryStorage::new());
        accounts
            .create_superuser(&new_user("sudo@email.com", "sudoUser", "sudoPassword1"))
            .unwrap();
        accounts
            .create_user(&new_user("user@email.com", "UserUnAuth", "nonAuthPassword"))
            .unwrap();
        accounts
    }

    #[test]
    fn test_superuser_is_staff() {
        let accounts = setup_accounts();
        let su = accounts.get_user("sudoUser").unwrap();
        let user = accounts.get_user("UserUnAuth").unwrap();

        assert!(su.is_staff());
        assert_eq!(su.role.as_deref(), Some("staff"));
        assert!(!user.is_staff());
        assert_eq!(user.role.as_deref(), Some("user"));
        assert!(su.has_daily_chance());
    }

    #[test]
    fn test_first_save_provisions_role_and_wallet() {
        let accounts = setup_accounts();
        let user = accounts.get_user("UserUnAuth").unwrap();
        assert!(user.is_provisioned());
        assert_eq!(user.wallet.as_deref(), Some("UserUnAuth"));

        let role = accounts.role_of("UserUnAuth").unwrap();
        assert_eq!(role.title, "user");
        assert_eq!(role.clearance, 0);
    }

    #[test]
    fn test_save_user_normalizes_username() {
        let accounts = accounts_at(now(), InMemoryStorage::new());
        let mut user = User::new("fresh@email.com", "placeholder", now());
        user.username = "fresh@email.com".to_string();
        accounts.save_user(&mut user).unwrap();

        assert_eq!(user.username, "fresh");
        assert!(accounts.get_user("fresh").unwrap().is_provisioned());
        assert!(accounts.get_user("fresh@email.com").unwrap_err().is_not_found());
        assert_eq!(user.wallet.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_second_user_reuses_default_role() {
        let accounts = setup_accounts();
        accounts
            .create_user(&new_user("valid@email.com", "NewerUser", "pw"))
            .unwrap();

        // staff + user, no duplicate user role
        assert_eq!(accounts.storage().role_count().unwrap(), 2);
        assert_eq!(
            accounts.role_of("NewerUser").unwrap(),
            accounts.role_of("UserUnAuth").unwrap()
        );
    }

    #[test]
    fn test_save_user_inserts_and_provisions_unsaved_user() {
        let accounts = accounts_at(now(), InMemoryStorage::new());
        let mut user = User::new("fresh@email.com", "Fresh", now());

        accounts.save_user(&mut user).unwrap();
        assert!(user.is_provisioned());

        // Saving again changes nothing about provisioning
        accounts.save_user(&mut user).unwrap();
        assert_eq!(accounts.storage().wallet_count().unwrap(), 1);
        assert_eq!(accounts.storage().role_count().unwrap(), 1);
    }

    #[test]
    fn test_save_user_reuses_existing_wallet_for_owner() {
        let storage = InMemoryStorage::new();
        storage.create_wallet("Fresh").unwrap();
        storage.adjust("Fresh", 9, Currency::Muns).unwrap();
        let accounts = accounts_at(now(), storage);

        let mut user = User::new("fresh@email.com", "Fresh", now());
        accounts.save_user(&mut user).unwrap();
        assert_eq!(accounts.balance_of("Fresh").unwrap().muns, 9);
    }

    #[test]
    fn test_create_user_from_email_username() {
        let accounts = setup_accounts();
        let user = accounts
            .create_user(&new_user(
                "neweruser@email.com",
                "neweruser@email.com",
                "NewUserPassword",
            ))
            .unwrap();
        assert_eq!(user.username, "neweruser");
    }

    #[test]
    fn test_create_user_failures() {
        let accounts = setup_accounts();

        assert!(matches!(
            accounts.create_user(&new_user("", "NewerUser", "pw")),
            Err(Error::MissingEmail)
        ));
        assert!(matches!(
            accounts.create_user(&new_user("x@email.com", "", "pw")),
            Err(Error::MissingUsername)
        ));
        assert!(matches!(
            accounts.create_user(&new_user("validbutdiff@email.com", "UserUnAuth", "pw")),
            Err(Error::UsernameTaken(_))
        ));
        assert!(matches!(
            accounts.create_user(&new_user("user@EMAIL.com", "Another", "pw")),
            Err(Error::EmailTaken(_))
        ));
    }

    #[test]
    fn test_availability_checks() {
        let accounts = setup_accounts();
        assert!(!accounts.username_available("sudoUser").unwrap());
        assert!(accounts.username_available("NoUserNamedThis").unwrap());
        assert!(!accounts.email_available("sudo@email.com").unwrap());
        assert!(accounts.email_available("free@email.com").unwrap());
    }

    #[test]
    fn test_get_clearance() {
        let accounts = setup_accounts();
        assert_eq!(
            accounts.get_clearance("sudoUser", None).unwrap(),
            Clearance::Level(1)
        );
        assert_eq!(
            accounts.get_clearance("UserUnAuth", None).unwrap(),
            Clearance::Level(0)
        );
        assert!(!accounts.has_clearance("UserUnAuth", 2).unwrap());
        assert!(accounts.has_clearance("sudoUser", 1).unwrap());
        assert!(matches!(
            accounts.get_clearance("UserUnAuth", Some(11)),
            Err(Error::OutOfRange { required: 11, .. })
        ));
    }

    #[test]
    fn test_sign_in_and_out() {
        let accounts = setup_accounts();

        let user = accounts.sign_in("UserUnAuth", "nonAuthPassword").unwrap();
        assert!(user.online);
        assert!(accounts.get_user("UserUnAuth").unwrap().online);

        let user = accounts.sign_out("UserUnAuth").unwrap();
        assert!(!user.online);

        assert!(matches!(
            accounts.sign_in("sudoUser", "wrongpassword"),
            Err(Error::InvalidCredentials)
        ));
        assert!(matches!(
            accounts.sign_in("ghost", "whatever"),
            Err(Error::InvalidCredentials)
        ));
    }

    #[test]
    fn test_sign_in_rejects_inactive_user() {
        let accounts = setup_accounts();
        let mut user = accounts.get_user("UserUnAuth").unwrap();
        user.is_active = false;
        accounts.save_user(&mut user).unwrap();

        assert!(matches!(
            accounts.sign_in("UserUnAuth", "nonAuthPassword"),
            Err(Error::InvalidCredentials)
        ));
    }

    #[test]
    fn test_daily_chance_timer() {
        let storage = InMemoryStorage::new();
        let accounts = accounts_at(now(), storage.clone());
        accounts
            .create_superuser(&new_user("sudo@email.com", "sudoUser", "sudoPassword1"))
            .unwrap();

        // Claimed two days ago: a reset makes it available again
        let mut user = accounts.get_user("sudoUser").unwrap();
        user.daily_chance.available = false;
        user.daily_chance.changed_at = now() - Duration::hours(48);
        accounts.save_user(&mut user).unwrap();
        assert_eq!(
            accounts
                .set_daily_chance("sudoUser", DailyChanceMode::Reset)
                .unwrap(),
            DailyChanceState::Available
        );

        assert_eq!(
            accounts.claim_daily_chance("sudoUser").unwrap(),
            DailyChanceState::Claimed
        );
        assert!(!accounts.get_user("sudoUser").unwrap().has_daily_chance());

        // Claimed 20 hours ago: still claimed after a reset
        let mut user = accounts.get_user("sudoUser").unwrap();
        user.daily_chance.changed_at = now() - Duration::hours(20);
        accounts.save_user(&mut user).unwrap();
        assert_eq!(
            accounts
                .set_daily_chance("sudoUser", DailyChanceMode::Reset)
                .unwrap(),
            DailyChanceState::Claimed
        );
    }

    #[test]
    fn test_sign_in_resets_daily_chance() {
        let storage = InMemoryStorage::new();
        let accounts = accounts_at(now() - Duration::hours(30), storage.clone());
        accounts
            .create_user(&new_user("user@email.com", "UserUnAuth", "nonAuthPassword"))
            .unwrap();
        accounts.claim_daily_chance("UserUnAuth").unwrap();

        let accounts = accounts_at(now(), storage);
        let user = accounts.sign_in("UserUnAuth", "nonAuthPassword").unwrap();
        assert!(user.has_daily_chance());
    }

    #[test]
    fn test_friends() {
        let accounts = setup_accounts();
        assert!(accounts.get_friends("sudoUser").unwrap().is_empty());

        assert!(accounts.add_friend("sudoUser", "UserUnAuth").unwrap());
        let friends = accounts.get_friends("sudoUser").unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].username, "UserUnAuth");
        assert_eq!(accounts.get_friends("UserUnAuth").unwrap()[0].username, "sudoUser");

        // Adding twice keeps a single link
        assert!(accounts.add_friend("UserUnAuth", "sudoUser").unwrap());
        assert_eq!(accounts.get_friends("sudoUser").unwrap().len(), 1);
    }

    #[test]
    fn test_add_unknown_friend_returns_false() {
        let accounts = setup_accounts();
        assert!(!accounts.add_friend("sudoUser", "NoUserNamedThis").unwrap());
        assert!(!accounts.add_friend("sudoUser", "sudoUser").unwrap());
        assert!(accounts.get_friends("sudoUser").unwrap().is_empty());
        assert!(
            accounts
                .add_friend("ghost", "sudoUser")
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_search_users() {
        let accounts = setup_accounts();
        let mut newer = accounts
            .create_user(&new_user("valid@email.com", "NewerUser", "pw"))
            .unwrap();
        newer.first_name = "Sudo".to_string();
        newer.display_full_name = true;
        accounts.save_user(&mut newer).unwrap();

        let found: Vec<String> = accounts
            .search_users("sudo_user", None)
            .unwrap()
            .into_iter()
            .map(|user| user.username)
            .collect();
        // "sudo" matches NewerUser by name first, then sudoUser by username;
        // "user" adds UserUnAuth without repeating the others
        assert_eq!(found, vec!["NewerUser", "sudoUser", "UserUnAuth"]);

        accounts.add_friend("sudoUser", "UserUnAuth").unwrap();
        let friends_only: Vec<String> = accounts
            .search_users("user", Some("sudoUser"))
            .unwrap()
            .into_iter()
            .map(|user| user.username)
            .collect();
        assert_eq!(friends_only, vec!["UserUnAuth"]);
    }

    #[test]
    fn test_wallet_balance_and_transfer() {
        let accounts = setup_accounts();
        assert_eq!(accounts.balance_of("sudoUser").unwrap(), Balance::default());

        accounts.adjust("sudoUser", 20, Currency::Shinies).unwrap();
        let (sender, receiver) = accounts
            .transfer("sudoUser", "UserUnAuth", 7, "shinies")
            .unwrap();
        assert_eq!(sender.shinies, 13);
        assert_eq!(receiver.shinies, 7);
        assert_eq!(accounts.balance_of("UserUnAuth").unwrap().shinies, 7);
    }

    #[test]
    fn test_transfer_errors() {
        let accounts = setup_accounts();
        assert!(matches!(
            accounts.transfer("sudoUser", "UserUnAuth", 20, "walrus"),
            Err(Error::UnknownCurrency(_))
        ));
        assert!(matches!(
            accounts.transfer("sudoUser", "ghost", 20, "muns"),
            Err(Error::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_transfer_to_self_leaves_balance_unchanged() {
        let accounts = setup_accounts();
        accounts.adjust("sudoUser", 50, Currency::Muns).unwrap();

        let (sender, receiver) = accounts.transfer("sudoUser", "sudoUser", 20, "muns").unwrap();
        assert_eq!(sender.muns, 50);
        assert_eq!(receiver.muns, 50);
        assert_eq!(accounts.balance_of("sudoUser").unwrap().muns, 50);
    }

    #[test]
    fn test_send_from_request() {
        let accounts = setup_accounts();
        accounts.adjust("UserUnAuth", 34, Currency::Muns).unwrap();

        let request: TransferRequest = serde_json::from_value(json!({
            "to": "sudoUser",
            "amount": 20,
            "currency": "Muns"
        }))
        .unwrap();
        accounts.send("UserUnAuth", &request).unwrap();
        assert_eq!(accounts.balance_of("sudoUser").unwrap().muns, 20);
        assert_eq!(accounts.balance_of("UserUnAuth").unwrap().muns, 14);

        let request: TransferRequest = serde_json::from_value(json!({
            "to": "sudoUser",
            "amount": "twenty",
            "currency": "muns"
        }))
        .unwrap();
        assert!(matches!(
            accounts.send("UserUnAuth", &request),
            Err(Error::InvalidAmount(_))
        ));
    }
}
