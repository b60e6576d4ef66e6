pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod import;
pub mod performance;
pub mod plans;
pub mod profile;
pub mod reports;
pub mod students;
pub mod transition;
