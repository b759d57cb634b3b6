//! Data access for the `data` table. Handlers talk to the `ReadingStore`
//! trait so they never see SQL.

pub mod reading_service;

pub use reading_service::*;
