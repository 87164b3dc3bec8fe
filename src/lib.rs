// ABOUTME: Library module for pg-dump-restore-filter
// ABOUTME: Exports selection loading, quoting helpers and the streaming dump filters

pub mod commands;
pub mod config;
pub mod filters;
pub mod restore;
pub mod utils;
