//! ocideploy command-line library
//!
//! Commands for packaging deployment sources into reproducible layer
//! archives and moving them through OCI registries. The binary in
//! `main.rs` is a thin wrapper over [`commands::execute`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
