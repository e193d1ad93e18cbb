#![doc = include_str!("../README.md")]

pub mod store;
mod types;

pub use store::SqliteStore;
use sqlx::migrate::Migrator;
pub static MIGRATOR: Migrator = sqlx::migrate!();
