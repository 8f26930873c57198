//! Shared pieces used by both the livescribe daemon and its CLI.

pub mod client;
pub mod dirs;
pub mod protocol;
