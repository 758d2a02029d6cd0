//! Subcommand handlers.

pub mod config_cmd;
pub mod query;
pub mod run;
pub mod tenants;
pub mod util;
