//! Core domain + application logic for the porter Discord bot.
//!
//! This crate is intentionally framework-agnostic. The Discord HTTP/gateway
//! client lives behind ports (traits) implemented in the adapter crate, so
//! the relocation pipeline, the subtext codec, the association linker and
//! the TTR cache are all testable with in-memory fakes.

pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod github;
pub mod hooks;
pub mod linker;
pub mod logging;
pub mod markup;
pub mod mentions;
pub mod message;
pub mod messaging;
pub mod proxy;
pub mod relocation;
pub mod subtext;

pub use errors::{Error, Result};
