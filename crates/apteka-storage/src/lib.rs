//! Apteka Storage crate - SQLite locations store and nearest lookup.
//!
//! Provides a WAL-mode SQLite database with migrations, a repository for
//! the `locations` table, and the [`NearbyLocator`] the orchestrator uses
//! for proximity questions.

pub mod db;
pub mod locations;
pub mod migrations;

pub use db::Database;
pub use locations::{
    haversine_m, LocationRepository, NearbyLocator, NearbyPlace, NewLocation, SqliteLocator,
};
