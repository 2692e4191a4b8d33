//! ---
//! cg_section: "01-core-functionality"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Primary orchestration and lifecycle management."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
//! Service bootstrap for certgate: configuration in, a ready engine and
//! certificate repository out.

#![warn(missing_docs)]

pub mod bootstrap;

pub use bootstrap::Services;
