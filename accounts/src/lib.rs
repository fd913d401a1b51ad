pub mod config;
pub mod daily_chance;
pub mod error;
pub mod password;
pub mod role;
pub mod service;
pub mod storage;
pub mod types;
pub mod user;
pub mod wallet;

pub use config::Settings;
pub use error::{Error, Result};
pub use service::{Accounts, NewUser};
pub use storage::{InMemoryStorage, Storage};
