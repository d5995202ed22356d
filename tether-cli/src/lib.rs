//! # tether-cli: console driver for tether channels
//!
//! Opens the chat and shell channels described by a TOML config and relays
//! stdin/stdout over them. Useful for exercising a backend without the
//! mobile client.
//!
//! ```text
//! > explain the build script       → claude-command on the chat channel
//! > !cargo --version               → shell-command on the shell channel
//! > /quit
//! ```

pub mod config;
pub mod console;
