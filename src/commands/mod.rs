// ABOUTME: Command implementations for each restore filter mode
// ABOUTME: Exports the filter driver shared by the schema, data and post-data commands

pub mod filter;

pub use filter::{filter, filter_stream, FilterOptions};
