//! Operator command routing
//!
//! This module handles:
//! - Translating operator intents into registry lookups and queue submissions
//! - Bounded-time response collection for single-target and broadcast dispatch

mod router;

pub use router::{CommandRouter, RouterError};
