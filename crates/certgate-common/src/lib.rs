//! ---
//! cg_section: "01-core-functionality"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Shared primitives and utilities for the certgate services."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
//! Shared primitives for the certgate workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the access control and certificate store crates.

#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub use config::{
    AccessControlConfig, AppConfig, AuditConfig, LoadedAppConfig, LoggingConfig, StorageBackend,
    StorageConfig,
};
pub use logging::{init_tracing, LogFormat};
