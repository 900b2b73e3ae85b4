//! Core domain + application logic for the Telegram post downloader.
//!
//! This crate is framework-agnostic. The Bot API and the MTProto user session
//! live behind ports (traits) implemented in adapter crates.

pub mod album;
pub mod batch;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod fetch;
pub mod formatting;
pub mod limits;
pub mod link;
pub mod locks;
pub mod logging;
pub mod media;
pub mod messaging;
pub mod ports;
pub mod progress;
pub mod security;
pub mod system;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
