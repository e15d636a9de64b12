//! Core types for shuttled: controller key ids, the action map, configuration,
//! persisted daemon state and the IPC protocol shared by daemon and CLI.

pub mod action;
pub mod config;
pub mod ipc;
pub mod key;
pub mod state;
