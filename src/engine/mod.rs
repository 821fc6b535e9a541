//! Core engine: the per-bot gate, stake, execute and settle loop.

pub mod accountant;
pub mod bot;
pub mod clock;
pub mod executor;
pub mod notifier;
pub mod scheduler;
