pub mod collaborations;
pub mod config;
pub mod db;
pub mod disputes;
pub mod error;
pub mod models;
pub mod notifications;
pub mod reminders;
pub mod reports;
pub mod schema;
pub mod sweeps;
