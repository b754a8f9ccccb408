//! Console front end for the parley assistant.

pub mod commands;
pub mod config;
pub mod console;
