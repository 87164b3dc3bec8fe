// ABOUTME: Data section filter for selective restore
// ABOUTME: Passes COPY blocks of selected tables through byte-for-byte

use super::grammar::{self, SearchPath, COPY_PREFIX, SEARCH_PATH_PREFIX};
use super::{LineFilter, LineSink};
use crate::filters::{RenameDirective, SelectionSet};
use crate::utils::sanitize_identifier;
use anyhow::Result;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Outside,
    InCopy,
}

pub struct DataFilter<'a> {
    selection: &'a SelectionSet,
    rename: Option<&'a RenameDirective>,
    current_schema: Option<String>,
    state: CopyState,
    blocks_copied: u64,
}

impl<'a> DataFilter<'a> {
    pub fn new(selection: &'a SelectionSet, rename: Option<&'a RenameDirective>) -> Self {
        Self {
            selection,
            rename,
            current_schema: None,
            state: CopyState::Outside,
            blocks_copied: 0,
        }
    }

    pub fn state(&self) -> CopyState {
        self.state
    }

    /// Number of COPY blocks passed through so far
    pub fn blocks_copied(&self) -> u64 {
        self.blocks_copied
    }

    fn on_search_path<W: Write>(&mut self, line: &[u8], sink: &mut LineSink<W>) -> Result<()> {
        let Some(search_path) = SearchPath::parse(line) else {
            self.current_schema = None;
            return Ok(());
        };
        let schema = search_path.schema();
        if !self.selection.contains_schema(&schema) {
            self.current_schema = None;
            return Ok(());
        }

        tracing::debug!(schema = %sanitize_identifier(&schema), "Entering selected schema");
        match self.rename {
            Some(rename) => sink.emit(&search_path.rewrite(rename))?,
            None => sink.emit(line)?,
        }
        self.current_schema = Some(schema);
        Ok(())
    }

    fn on_copy<W: Write>(&mut self, line: &[u8], text: &str, sink: &mut LineSink<W>) -> Result<()> {
        let (Some(schema), Some(table)) = (self.current_schema.as_deref(), grammar::copy_table(text))
        else {
            return Ok(());
        };
        if !self.selection.contains_table(schema, &table) {
            return Ok(());
        }

        tracing::debug!(
            schema = %sanitize_identifier(schema),
            table = %sanitize_identifier(&table),
            "Copying table data"
        );
        self.state = CopyState::InCopy;
        sink.emit(line)
    }
}

impl LineFilter for DataFilter<'_> {
    fn process_line<W: Write>(&mut self, line: &[u8], sink: &mut LineSink<W>) -> Result<()> {
        if self.state == CopyState::InCopy {
            sink.emit(line)?;
            if grammar::is_copy_terminator(line) {
                self.state = CopyState::Outside;
                self.blocks_copied += 1;
            }
            return Ok(());
        }

        if line.starts_with(SEARCH_PATH_PREFIX.as_bytes()) {
            self.on_search_path(line, sink)
        } else if line.starts_with(COPY_PREFIX.as_bytes()) {
            let text = grammar::decode_line(line);
            self.on_copy(line, &text, sink)
        } else {
            Ok(())
        }
    }

    fn finish<W: Write>(&mut self, _sink: &mut LineSink<W>) -> Result<()> {
        if self.state == CopyState::InCopy {
            tracing::warn!("Dump ended inside a COPY block without a \\. terminator");
        }
        tracing::debug!("{} COPY blocks passed through", self.blocks_copied);
        Ok(())
    }
}
