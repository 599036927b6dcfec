//! Core business logic module
//!
//! This module contains the transfer components:
//! - `repository` - Single-account reads and locked balance updates
//! - `transfer` - Atomic, deadlock-free transfers between two accounts

pub mod repository;
pub mod transfer;

pub use repository::AccountRepository;
pub use transfer::TransferCoordinator;
