//! Shared types for tune: configuration, the channel catalog and the
//! now-playing event wire format.

pub mod catalog;
pub mod config;
pub mod platform;
pub mod protocol;
