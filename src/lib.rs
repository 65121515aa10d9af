// src/lib.rs

pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod migration;
pub mod store;

pub use error::{Result, StoreError};
