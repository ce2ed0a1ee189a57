//! Hive — a local-first personal agent runtime.
//!
//! This crate is organized in layers, from the bottom up:
//!
//! - [`atoms`] — pure types, constants, and the crate-wide error. No I/O.
//! - [`store`] — the durable embedded store (agents, conversations, messages,
//!   knowledge, episodes, tasks, platform conversations, meta).
//! - [`provider`] — the AI provider abstraction and its concrete backends.
//! - [`resilience`] — transient-error classification, retry, first-token
//!   timeout, shared by the provider layer and the orchestrator.
//! - [`prompt`] — system prompt assembly.
//! - [`orchestrator`] — the chat loop: tool calls, streaming, sanitization.
//! - [`memory`] — the passive memory pipeline (episodes, facts, mood, crystallization).
//! - [`integrations`] — per-platform authorization state.
//! - [`platform`] — the platform adapter trait and the inbound-message bridge.
//! - [`task_worker`] — the background task queue.
//! - [`daemon`] — the `Runtime` context struct, IPC server, and heartbeat.
//!
//! `hived`, `hive-watcher`, and `hivectl` (under `src/bin/`) are thin
//! executables built on top of this library.

pub mod atoms;
pub mod daemon;
pub mod integrations;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod platform;
pub mod prompt;
pub mod prompt_autoupdate;
pub mod provider;
pub mod resilience;
pub mod store;
pub mod task_worker;

pub use atoms::error::{HiveError, HiveResult};
