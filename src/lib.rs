pub mod agent;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod interrupt;
pub mod models;
pub mod pipeline;
pub mod stage;
pub mod vcs;
pub mod verify;
