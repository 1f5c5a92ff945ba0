//! CLI subcommand implementations for `ax25`.
//!
//! - [`parse`] - Address validation and encoding
//! - [`pipe`] - Netcat-style `dial` and `listen`
//!
//! # Usage
//!
//! ```ignore
//! use patty::commands;
//!
//! commands::parse::run("n0call-6", std::io::stdout())?;
//! commands::pipe::dial(&client, "K3XEC-10", std::io::stdin(), std::io::stdout())?;
//! ```

pub mod parse;
pub mod pipe;
