// ABOUTME: Selection set and rename directive for selective restore
// ABOUTME: Loads the chosen schemas/tables once and answers membership queries

use crate::utils::{self, escape, smart_split, strip_enclosing_quotes};
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Table token that selects every table in a schema.
pub const WILDCARD: &str = "*";

/// A schema and table pair in canonical (unquoted) form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    pub schema: String,
    pub table: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse one selection-file entry.
    ///
    /// The name is split with [`smart_split`], each side is trimmed and one
    /// layer of enclosing quotes is removed. Doubled quotes inside a name are
    /// kept as written.
    pub fn parse_entry(entry: &str) -> Result<Self> {
        let (schema, table) = smart_split(entry)
            .with_context(|| format!("Invalid table entry '{}'", utils::sanitize_identifier(entry)))?;
        Ok(Self::new(
            strip_enclosing_quotes(schema.trim()),
            strip_enclosing_quotes(table.trim()),
        ))
    }

    pub fn is_wildcard(&self) -> bool {
        self.table == WILDCARD
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Schemas and tables chosen for restore
///
/// Every pair's schema is also present in the schema set. Built once before
/// streaming; the filters only read it.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    schemas: BTreeSet<String>,
    tables: BTreeSet<QualifiedName>,
}

impl SelectionSet {
    /// Creates an empty selection (restores nothing)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a selection from selection-file style entries.
    ///
    /// Blank entries are skipped. Any entry that cannot be split is fatal.
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selection = Self::empty();
        for entry in entries {
            selection.add_entry(entry.as_ref())?;
        }
        Ok(selection)
    }

    /// Read a selection file: one qualified name per line.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read table file at {}", path.display()))?;
        let selection = Self::from_entries(contents.lines())
            .with_context(|| format!("Failed to parse table file at {}", path.display()))?;
        tracing::debug!(
            "Loaded {} table entries across {} schemas from {}",
            selection.tables.len(),
            selection.schemas.len(),
            path.display()
        );
        Ok(selection)
    }

    /// Add one entry; blank entries are ignored.
    pub fn add_entry(&mut self, entry: &str) -> Result<()> {
        if entry.trim().is_empty() {
            return Ok(());
        }
        let name = QualifiedName::parse_entry(entry)?;
        self.insert(name);
        Ok(())
    }

    /// Select a whole schema, the same as a `schema.*` entry.
    pub fn add_schema(&mut self, schema: &str) -> Result<()> {
        let schema = strip_enclosing_quotes(schema.trim());
        if schema.is_empty() {
            bail!("Schema name cannot be empty");
        }
        self.insert(QualifiedName::new(schema, WILDCARD));
        Ok(())
    }

    pub fn insert(&mut self, name: QualifiedName) {
        self.schemas.insert(name.schema.clone());
        self.tables.insert(name);
    }

    /// Merge another selection into this one
    pub fn merge(&mut self, other: SelectionSet) {
        self.schemas.extend(other.schemas);
        self.tables.extend(other.tables);
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn schemas(&self) -> &BTreeSet<String> {
        &self.schemas
    }

    pub fn tables(&self) -> &BTreeSet<QualifiedName> {
        &self.tables
    }

    /// Determines if a schema is part of the selection
    pub fn contains_schema(&self, schema: &str) -> bool {
        self.schemas.contains(schema)
    }

    /// Determines if a table is selected, directly or through `schema.*`
    pub fn contains_table(&self, schema: &str, table: &str) -> bool {
        let exact = QualifiedName::new(schema, table);
        if self.tables.contains(&exact) {
            return true;
        }
        self.tables.contains(&QualifiedName::new(schema, WILDCARD))
    }

    /// SHA-256 over the sorted selection, for correlating runs in logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for schema in &self.schemas {
            hasher.update(b"schema\0");
            hasher.update(schema.as_bytes());
            hasher.update(b"\0");
        }
        for name in &self.tables {
            hasher.update(b"table\0");
            hasher.update(name.schema.as_bytes());
            hasher.update(b"\0");
            hasher.update(name.table.as_bytes());
            hasher.update(b"\0");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Replacement schema name applied to matched `search_path` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameDirective {
    schema: String,
}

impl RenameDirective {
    pub fn new(schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        if schema.is_empty() {
            bail!("Change schema name cannot be empty");
        }
        Ok(Self { schema })
    }

    /// Read the single-line rename file. Surrounding newlines are dropped.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Change schema file {} does not exist", path.display());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read change schema file at {}", path.display()))?;
        Self::new(raw.trim_matches(|c| c == '\n' || c == '\r'))
            .with_context(|| format!("Change schema file {} is empty", path.display()))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The replacement text as it appears inside a `search_path` line.
    pub fn escaped(&self) -> String {
        escape(&self.schema, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_entry_strips_one_quote_layer() {
        let name = QualifiedName::parse_entry("\"My Schema\".\"a\"\"b\"").unwrap();
        assert_eq!(name.schema, "My Schema");
        assert_eq!(name.table, "a\"\"b");
    }

    #[test]
    fn test_parse_entry_trims_whitespace() {
        let name = QualifiedName::parse_entry("public. t1 ").unwrap();
        assert_eq!(name, QualifiedName::new("public", "t1"));
    }

    #[test]
    fn test_every_table_schema_is_selected() {
        let selection = SelectionSet::from_entries(["public.t1", "sales.*", "\"x.y\".z"]).unwrap();
        for name in selection.tables() {
            assert!(selection.contains_schema(&name.schema));
        }
        assert_eq!(selection.schemas().len(), 3);
    }

    #[test]
    fn test_contains_table_exact_and_wildcard() {
        let selection = SelectionSet::from_entries(["public.t1", "sales.*"]).unwrap();

        assert!(selection.contains_table("public", "t1"));
        assert!(!selection.contains_table("public", "t2"));
        assert!(selection.contains_table("sales", "orders"));
        assert!(selection.contains_table("sales", "never_named"));
        assert!(!selection.contains_table("other", "t1"));
    }

    #[test]
    fn test_ambiguous_entry_is_fatal() {
        let result = SelectionSet::from_entries(["public.t1", "\"A\".\"B\".\"C\""]);
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_entries_are_skipped() {
        let selection = SelectionSet::from_entries(["public.t1", "", "  "]).unwrap();
        assert_eq!(selection.tables().len(), 1);
    }

    #[test]
    fn test_add_schema_selects_wildcard() {
        let mut selection = SelectionSet::empty();
        selection.add_schema("\"Sales\"").unwrap();
        assert!(selection.contains_schema("Sales"));
        assert!(selection.contains_table("Sales", "anything"));
        assert!(selection.add_schema("  ").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "public.t1").unwrap();
        writeln!(tmp, "\"Weird.Schema\".*").unwrap();

        let selection = SelectionSet::load_from_file(tmp.path()).unwrap();
        assert!(selection.contains_table("public", "t1"));
        assert!(selection.contains_table("Weird.Schema", "t9"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = SelectionSet::load_from_file(Path::new("/nonexistent/table_file"));
        assert!(result.is_err());
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = SelectionSet::from_entries(["public.t1", "sales.*"]).unwrap();
        let b = SelectionSet::from_entries(["sales.*", "public.t1"]).unwrap();
        let c = SelectionSet::from_entries(["public.t2"]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_rename_directive_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "restored").unwrap();
        let rename = RenameDirective::load_from_file(tmp.path()).unwrap();
        assert_eq!(rename.schema(), "restored");
        assert_eq!(rename.escaped(), "restored");
    }

    #[test]
    fn test_rename_directive_escapes_quotes() {
        let rename = RenameDirective::new("we\"ird").unwrap();
        assert_eq!(rename.escaped(), "we\"\"ird");
    }

    #[test]
    fn test_rename_directive_rejects_empty() {
        let tmp = NamedTempFile::new().unwrap();
        assert!(RenameDirective::load_from_file(tmp.path()).is_err());
        assert!(RenameDirective::load_from_file(Path::new("/nonexistent/rename")).is_err());
    }
}
