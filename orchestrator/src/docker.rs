//! Shell-safe command construction for the Docker-compatible CLI on a
//! target node.
//!
//! Everything in this module is pure and deterministic: the runners
//! execute exactly the strings built here, so every argument that may
//! contain untrusted text goes through [`shell::quote`] first.

pub mod commands;
pub mod shell;
pub mod traefik;
