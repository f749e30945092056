//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                        |
//! |-----------------|---------------------------------------------------------|
//! | `run`           | `Run`, `Advance`                                        |
//! | `phase`         | `List`, `Status`, `Checkpoint`, `Resume`, `Reset`       |
//! | `audit`         | `Audit`                                                 |
//! | `project`       | `Init`, `Handoff`                                       |
//! | `config`        | `Config`                                                |

pub mod audit;
pub mod config;
pub mod phase;
pub mod project;
pub mod run;

pub use audit::cmd_audit;
pub use config::cmd_config;
pub use phase::{cmd_checkpoint, cmd_list, cmd_reset, cmd_resume, cmd_status};
pub use project::{cmd_handoff, cmd_init};
pub use run::{cmd_advance, cmd_run};
