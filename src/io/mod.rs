//! I/O module
//!
//! Handles CSV seed files.
//!
//! # Components
//!
//! - `csv_format` - Seed record parsing and conversion to accounts

pub mod csv_format;

pub use csv_format::{parse_accounts, read_accounts_csv, AccountRecord};
