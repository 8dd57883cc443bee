//! Bounce: a rule-driven auto-responder for chat messages.

pub mod actions;
pub mod channels;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod rules;
