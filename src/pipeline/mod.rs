//! Pipeline orchestration: the execution engine.
//!
//! ## Overview
//!
//! A workflow names a stage sequence (plan → code → test → review →
//! document, or a variant chosen by workflow type). The executor drives
//! that sequence against a working tree, verifying after the code stage
//! that the tree still builds. A failed build hands off to the fix
//! coordinator, which runs bounded corrective sub-pipelines and resumes
//! the parent's remaining stages once the tree is healthy again.
//!
//! ## Module Map
//!
//! ```text
//!              PipelineExecutor::execute(workflow_id)
//!                          │
//!                          v
//!  executor.rs   stage loop: interrupt check → agent execution record
//!                → capability invocation → (code stage) build gate
//!                          │
//!           build verification fails │ build passes
//!                          v         v
//!  healing.rs    schedule_fix()     checkpoint commit, next stage
//!                attempt loop ≤ 3:  ...
//!                plan+code, re-verify, resume parent remainder
//!                          │
//!                          v
//!  decompose.rs  structured-plan artifact → child workflows via the
//!                owning system's API (non-fatal)
//! ```
//!
//! ## Supporting components
//!
//! | Component               | Responsibility                               |
//! |-------------------------|----------------------------------------------|
//! | `stage::AgentRegistry`  | stage kind → capability binding              |
//! | `verify::BuildVerifier` | install/build/type-check ladder              |
//! | `interrupt`             | pause/cancel/instruction at stage boundaries |
//! | `vcs::GitWorkspace`     | checkpoint commits, root-pipeline push       |
//! | `events::EventLogger`   | append-only run history, failures swallowed  |

mod decompose;
mod executor;
mod healing;

pub use decompose::{Decomposer, HttpWorkflowApi, SubworkflowApi};
pub use executor::PipelineExecutor;
pub use healing::MAX_FIX_ATTEMPTS;
