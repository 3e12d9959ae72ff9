//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                                         |
//! |------------|----------------------------------------------------------|
//! | `workflow` | `Create`, `List`, `Status`, `Pause`, `Resume`, `Cancel`, `Instruct` |
//! | `run`      | `Run`                                                    |
//! | `logs`     | `Logs`                                                   |

pub mod logs;
pub mod run;
pub mod workflow;

pub use logs::cmd_logs;
pub use run::cmd_run;
pub use workflow::{
    cmd_cancel, cmd_create, cmd_instruct, cmd_list, cmd_pause, cmd_resume, cmd_status,
};
