// ABOUTME: Post-data section filter (indexes, rules, triggers, constraints)
// ABOUTME: Emits objects whose target table is selected, with their search_path

use super::grammar::{
    self, ObjectKind, SearchPath, NAME_HEADER_PREFIX, SEARCH_PATH_PREFIX, SET_PREFIX,
};
use super::{LineFilter, LineSink};
use crate::filters::SelectionSet;
use crate::utils::sanitize_identifier;
use anyhow::Result;
use std::io::Write;

const CREATE_PREFIX: &str = "CREATE ";
const REPLACE_PREFIX: &str = "REPLACE ";
const ALTER_TABLE_PREFIX: &str = "ALTER TABLE ";
const ALTER_TABLE_ONLY_PREFIX: &str = "ALTER TABLE ONLY";

pub struct PostDataFilter<'a> {
    selection: &'a SelectionSet,
    current_schema: Option<String>,
    kind: Option<ObjectKind>,
    output: bool,
    /// Selected `search_path` line, written before the next emitted line
    pending_search_path: Option<Vec<u8>>,
    /// First line of a CREATE TRIGGER, waiting for the line naming its table
    pending_trigger: Option<Vec<u8>>,
}

impl<'a> PostDataFilter<'a> {
    pub fn new(selection: &'a SelectionSet) -> Self {
        Self {
            selection,
            current_schema: None,
            kind: None,
            output: false,
            pending_search_path: None,
            pending_trigger: None,
        }
    }

    fn schema_selected(&self) -> bool {
        self.current_schema
            .as_deref()
            .is_some_and(|schema| self.selection.contains_schema(schema))
    }

    fn table_selected(&self, line: &str, keyword: &str) -> bool {
        let Some(schema) = self.current_schema.as_deref() else {
            return false;
        };
        match grammar::table_after_keyword(line, keyword) {
            Some(table) => {
                let selected = self.selection.contains_table(schema, &table);
                tracing::trace!(
                    schema = %sanitize_identifier(schema),
                    table = %sanitize_identifier(&table),
                    selected,
                    "Post-data target"
                );
                selected
            }
            None => false,
        }
    }

    fn on_search_path(&mut self, line: &[u8]) {
        self.output = false;
        self.pending_trigger = None;
        let Some(search_path) = SearchPath::parse(line) else {
            self.current_schema = None;
            self.pending_search_path = None;
            return;
        };
        let schema = search_path.schema();
        self.pending_search_path = if self.selection.contains_schema(&schema) {
            Some(line.to_vec())
        } else {
            None
        };
        self.current_schema = Some(schema);
    }

    fn on_statement(&mut self, line: &[u8], text: &str) {
        match self.kind {
            Some(ObjectKind::Rule) => self.output = self.table_selected(text, " TO "),
            Some(ObjectKind::Index) => self.output = self.table_selected(text, " ON "),
            Some(ObjectKind::Trigger) => {
                self.output = false;
                self.pending_trigger = Some(line.to_vec());
            }
            _ => {}
        }
    }

    fn on_alter_table(&mut self, text: &str) {
        self.output = if text.starts_with(ALTER_TABLE_ONLY_PREFIX) {
            self.table_selected(text, " ONLY ")
        } else {
            self.table_selected(text, " TABLE ")
        };
    }

    fn on_trigger_target(&mut self, text: &str) {
        self.output = self.table_selected(text, " ON ");
        if !self.output {
            self.pending_trigger = None;
        }
    }

    fn emit<W: Write>(&mut self, line: &[u8], sink: &mut LineSink<W>) -> Result<()> {
        if let Some(search_path) = self.pending_search_path.take() {
            sink.emit(&search_path)?;
        }
        if let Some(trigger) = self.pending_trigger.take() {
            sink.emit(&trigger)?;
        }
        sink.emit(line)
    }
}

impl LineFilter for PostDataFilter<'_> {
    fn process_line<W: Write>(&mut self, line: &[u8], sink: &mut LineSink<W>) -> Result<()> {
        let text = grammar::decode_line(line);
        let text: &str = &text;

        let constraint = matches!(
            self.kind,
            Some(ObjectKind::Constraint) | Some(ObjectKind::FkConstraint)
        );

        if text.starts_with(SEARCH_PATH_PREFIX) {
            self.on_search_path(line);
        } else if text.starts_with(SET_PREFIX) {
            self.output = true;
        } else if text.starts_with(NAME_HEADER_PREFIX) {
            self.kind = grammar::header_kind(text);
            self.output = false;
            self.pending_trigger = None;
        } else if self.schema_selected()
            && self.kind.is_some()
            && (text.starts_with(CREATE_PREFIX) || text.starts_with(REPLACE_PREFIX))
        {
            self.on_statement(line, text);
        } else if self.schema_selected() && constraint && text.starts_with(ALTER_TABLE_PREFIX) {
            self.on_alter_table(text);
        } else if self.pending_trigger.is_some() {
            self.on_trigger_target(text);
        }

        if self.output {
            self.emit(line, sink)?;
        }
        Ok(())
    }

    fn finish<W: Write>(&mut self, _sink: &mut LineSink<W>) -> Result<()> {
        if self.pending_trigger.take().is_some() {
            tracing::debug!("Discarding trigger with no target line at end of input");
        }
        Ok(())
    }
}
