//! CLI command implementations.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Mark and/or sweep one repository snapshot |
//! | `rules get\|set` | Read or replace retention rules on the control plane |
//! | `manifest show\|list` | Inspect stored mark manifests |
//!
//! # Example Usage
//!
//! ```bash
//! # Mark only, nothing is deleted
//! lakesweep run --snapshot repo.json --mode mark --rules rules.json
//!
//! # Sweep exactly what that mark found
//! lakesweep run --snapshot repo.json --mode sweep --mark-id 0190b3c2-...
//!
//! lakesweep manifest show --repo example --mark-id 0190b3c2-...
//! ```

// CLI modules write their results to stdout
#![allow(clippy::print_stdout)]

pub mod gc;
pub mod manifest;
pub mod rules;

pub use gc::RunArgs;
pub use manifest::ManifestCommand;
pub use rules::RulesCommand;
