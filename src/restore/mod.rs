// ABOUTME: Streaming restore filters over plain-text dump files
// ABOUTME: Shared line reader, counting sink and mode selection for schema/data/post-data

pub mod data;
pub mod grammar;
pub mod post_data;
pub mod schema;

pub use data::DataFilter;
pub use post_data::PostDataFilter;
pub use schema::SchemaFilter;

use anyhow::{Context, Result};
use std::fmt;
use std::io::{BufRead, Write};

/// Which section of the dump is being filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// DDL section (tables, schemas, ACLs, constraints)
    Schema,
    /// COPY blocks
    Data,
    /// Indexes, rules, triggers and constraints created after the data load
    PostData,
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreMode::Schema => write!(f, "schema"),
            RestoreMode::Data => write!(f, "data"),
            RestoreMode::PostData => write!(f, "post-data"),
        }
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub lines_read: u64,
    pub lines_emitted: u64,
    pub bytes_emitted: u64,
}

/// Output side of a filter. Lines are written whole and counted.
pub struct LineSink<W: Write> {
    inner: W,
    lines: u64,
    bytes: u64,
}

impl<W: Write> LineSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            lines: 0,
            bytes: 0,
        }
    }

    pub fn emit(&mut self, line: &[u8]) -> Result<()> {
        self.inner
            .write_all(line)
            .context("Failed to write filtered output")?;
        self.lines += 1;
        self.bytes += line.len() as u64;
        Ok(())
    }

    pub fn lines_emitted(&self) -> u64 {
        self.lines
    }

    pub fn bytes_emitted(&self) -> u64 {
        self.bytes
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().context("Failed to flush filtered output")
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// A single-pass, line-at-a-time dump filter.
///
/// Lines arrive with their terminator attached and may not be valid UTF-8;
/// implementations must write emitted lines back unchanged unless they
/// deliberately rewrite them.
pub trait LineFilter {
    fn process_line<W: Write>(&mut self, line: &[u8], sink: &mut LineSink<W>) -> Result<()>;

    /// Called once after the last line. Anything still buffered is dropped.
    fn finish<W: Write>(&mut self, _sink: &mut LineSink<W>) -> Result<()> {
        Ok(())
    }
}

/// Stream every line of `input` through `filter` into `output`.
pub fn run_filter<F, R, W>(filter: &mut F, mut input: R, output: W) -> Result<FilterStats>
where
    F: LineFilter,
    R: BufRead,
    W: Write,
{
    let mut sink = LineSink::new(output);
    let mut stats = FilterStats::default();
    let mut line = Vec::with_capacity(8 * 1024);

    loop {
        line.clear();
        let read = input
            .read_until(b'\n', &mut line)
            .context("Failed to read dump input")?;
        if read == 0 {
            break;
        }
        stats.lines_read += 1;
        filter
            .process_line(&line, &mut sink)
            .with_context(|| format!("Failed to filter dump line {}", stats.lines_read))?;
    }

    filter.finish(&mut sink)?;
    sink.flush()?;

    stats.lines_emitted = sink.lines_emitted();
    stats.bytes_emitted = sink.bytes_emitted();
    Ok(stats)
}
