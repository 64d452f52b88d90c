//! Spreadsheet-to-database reconciliation for the sales pipeline
//!
//! Each registered source is a spreadsheet tab. A sync run reads the tab,
//! cleans and decodes its rows, matches them against the stored records by
//! row position and then by composite key, and applies the resulting creates,
//! updates and archived deletes to the SQLite store.

pub mod cli;
pub mod config;
pub mod error;
pub mod resilience;
pub mod sheets;
pub mod sync;

pub use error::SyncError;
