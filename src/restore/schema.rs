// ABOUTME: Schema (DDL) section filter for selective restore
// ABOUTME: Classifies each dump line and keeps only statements of selected objects

use super::grammar::{
    self, ObjectHeader, ObjectKind, SearchPath, ALTER_TABLE_PREFIX, DATA_HEADER_PREFIXES,
    DROP_PREFIX, NAME_HEADER_PREFIX, SEARCH_PATH_PREFIX, SET_PREFIX,
};
use super::{LineFilter, LineSink};
use crate::filters::{RenameDirective, SelectionSet};
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};
use std::io::Write;

/// Where the stream is relative to object definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// Before the first header comment. DROP TABLE lines here belong to the
    /// clean-up preamble and are checked against the selection.
    Preamble,
    /// Inside the definition introduced by the last header comment.
    Object(ObjectKind),
    /// After a header comment whose markers could not be parsed.
    Unknown,
}

impl Section {
    fn in_function_body(&self) -> bool {
        matches!(self, Section::Object(ObjectKind::Function))
    }
}

/// Per-run state of the schema filter
#[derive(Debug)]
pub struct SchemaFilterState {
    pub section: Section,
    /// Classification inherited by continuation lines
    pub output: bool,
    /// A matched header re-arms `search_path` handling; a matched
    /// `search_path` line consumes it.
    pub search_path_armed: bool,
    /// CONSTRAINT header held until its ALTER TABLE names the target
    pub pending: Option<Vec<u8>>,
}

impl Default for SchemaFilterState {
    fn default() -> Self {
        Self {
            section: Section::Preamble,
            output: false,
            search_path_armed: true,
            pending: None,
        }
    }
}

/// Streams the DDL section, keeping only what belongs to the selection
pub struct SchemaFilter<'a> {
    selection: &'a SelectionSet,
    rename: Option<&'a RenameDirective>,
    state: SchemaFilterState,
}

impl<'a> SchemaFilter<'a> {
    pub fn new(selection: &'a SelectionSet, rename: Option<&'a RenameDirective>) -> Self {
        Self {
            selection,
            rename,
            state: SchemaFilterState::default(),
        }
    }

    pub fn state(&self) -> &SchemaFilterState {
        &self.state
    }

    fn on_search_path<W: Write>(
        &mut self,
        line: &[u8],
        search_path: SearchPath<'_>,
        sink: &mut LineSink<W>,
    ) -> Result<()> {
        self.drop_pending("search_path changed");
        let schema = search_path.schema();

        if !self.selection.contains_schema(&schema) {
            tracing::trace!(schema = %sanitize_identifier(&schema), "search_path not selected");
            self.state.output = false;
            return Ok(());
        }

        self.state.output = true;
        self.state.search_path_armed = false;
        match self.rename {
            Some(rename) => {
                tracing::debug!(
                    schema = %sanitize_identifier(&schema),
                    target = %sanitize_identifier(rename.schema()),
                    "Rewriting search_path"
                );
                sink.emit(&search_path.rewrite(rename))
            }
            None => sink.emit(line),
        }
    }

    fn on_drop(&mut self, line: &str) {
        self.state.output = if !grammar::is_drop_table(line) {
            false
        } else if self.state.section != Section::Preamble {
            false
        } else {
            match grammar::drop_table_target(line) {
                Ok(target) => self.selection.contains_table(&target.schema, &target.table),
                Err(err) => {
                    tracing::warn!(
                        "Skipping DROP TABLE with unparsable target '{}': {:#}",
                        sanitize_identifier(grammar::trim_line_end(line)),
                        err
                    );
                    false
                }
            }
        };
    }

    fn on_object_header(&mut self, line: &[u8], text: &str) {
        self.state.output = false;
        let Some(header) = ObjectHeader::parse(text, NAME_HEADER_PREFIX) else {
            tracing::debug!(
                "Unrecognised object header: {}",
                sanitize_identifier(grammar::trim_line_end(text))
            );
            if self.state.section == Section::Preamble {
                self.state.section = Section::Unknown;
            }
            return;
        };

        self.drop_pending("next object header");
        let included = match header.kind {
            ObjectKind::Table | ObjectKind::ExternalTable | ObjectKind::Acl => {
                self.selection.contains_table(header.schema, header.name)
            }
            ObjectKind::Schema => self.selection.contains_schema(header.name),
            ObjectKind::Constraint => {
                self.state.pending = Some(line.to_vec());
                false
            }
            _ => false,
        };

        tracing::trace!(
            name = %sanitize_identifier(header.name),
            schema = %sanitize_identifier(header.schema),
            kind = ?header.kind,
            included,
            "Object header"
        );

        if included {
            self.state.output = true;
            self.state.search_path_armed = true;
        }
        self.state.section = Section::Object(header.kind);
    }

    fn on_data_header(&mut self, text: &str) {
        self.drop_pending("data header");
        self.state.output = false;
        match ObjectHeader::parse_data(text) {
            Some(header) => {
                if header.kind == ObjectKind::TableData
                    && self.selection.contains_table(header.schema, header.name)
                {
                    self.state.output = true;
                    self.state.search_path_armed = true;
                }
                self.state.section = Section::Object(header.kind);
            }
            None => {
                if self.state.section == Section::Preamble {
                    self.state.section = Section::Unknown;
                }
            }
        }
    }

    fn on_alter_table<W: Write>(&mut self, text: &str, sink: &mut LineSink<W>) -> Result<()> {
        let Some(buffered) = self.state.pending.take() else {
            return Ok(());
        };
        let token = grammar::alter_table_target(text).with_context(|| {
            format!(
                "ALTER TABLE without a target: {}",
                sanitize_identifier(grammar::trim_line_end(text))
            )
        })?;
        let target = grammar::qualified_from_stream(token)?;

        if self.selection.contains_table(&target.schema, &target.table) {
            tracing::debug!(table = %sanitize_identifier(&target.to_string()), "Constraint confirmed");
            sink.emit(&buffered)?;
            self.state.output = true;
            self.state.search_path_armed = true;
        } else {
            tracing::trace!(table = %sanitize_identifier(&target.to_string()), "Constraint discarded");
            self.state.output = false;
        }
        Ok(())
    }

    fn drop_pending(&mut self, reason: &str) {
        if self.state.pending.take().is_some() {
            tracing::debug!("Discarding unconfirmed CONSTRAINT header ({})", reason);
        }
    }
}

impl LineFilter for SchemaFilter<'_> {
    fn process_line<W: Write>(&mut self, line: &[u8], sink: &mut LineSink<W>) -> Result<()> {
        let text = grammar::decode_line(line);
        let text: &str = &text;

        if self.state.search_path_armed && text.starts_with(SEARCH_PATH_PREFIX) {
            let Some(search_path) = SearchPath::parse(line) else {
                // Malformed search_path: unmatched, so it is dropped and
                // switches output off like a search_path of another schema.
                tracing::debug!(
                    "Dropping malformed search_path: {}",
                    sanitize_identifier(grammar::trim_line_end(text))
                );
                self.drop_pending("search_path changed");
                self.state.output = false;
                return Ok(());
            };
            return self.on_search_path(line, search_path, sink);
        }

        if text.starts_with(SET_PREFIX) {
            // Unlike a selected header, a SET line only passes itself
            // through: the inherited output flag is left as it was, so a
            // SET between an unselected header and its CREATE does not
            // pull the CREATE into the output.
            if !self.state.section.in_function_body() {
                sink.emit(line)?;
            }
            return Ok(());
        }

        if text.starts_with(DROP_PREFIX) {
            self.on_drop(text);
        } else if text.starts_with(NAME_HEADER_PREFIX) {
            self.on_object_header(line, text);
        } else if DATA_HEADER_PREFIXES.iter().any(|p| text.starts_with(p)) {
            self.on_data_header(text);
        } else if self.state.pending.is_some() {
            if !text.starts_with(ALTER_TABLE_PREFIX) {
                return Ok(());
            }
            self.on_alter_table(text, sink)?;
        }

        if self.state.output {
            sink.emit(line)?;
        }
        Ok(())
    }

    fn finish<W: Write>(&mut self, _sink: &mut LineSink<W>) -> Result<()> {
        self.drop_pending("end of input");
        Ok(())
    }
}
