// SPDX-License-Identifier: Apache-2.0

//! Durable per-file offset registry.

pub mod config;
pub mod error;
pub mod identity;
pub mod migrate;
pub mod persistence;
pub mod state;
pub mod store;

pub use config::RegistryConfig;
pub use error::{Error, Result};
pub use identity::FileIdentity;
pub use migrate::{Migrator, RegistryFormat};
pub use state::{FileState, Ttl};
pub use store::{RegistryStore, UpsertOutcome};
