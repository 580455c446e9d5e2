//! Session management for connected agents
//!
//! This module handles:
//! - Per-agent session state and socket ownership
//! - The per-session worker loop (command delivery, replies, file retrieval)
//! - The shared session registry and id allocation
//! - Liveness sweeping of disconnected sessions

mod connection;
mod handler;
mod registry;
mod sweeper;

pub use connection::Session;
pub use handler::SessionHandler;
pub use registry::SessionRegistry;
pub use sweeper::LivenessSweeper;
