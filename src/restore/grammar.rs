// ABOUTME: Fixed line grammar of plain-text dumps (search_path, headers, COPY, DROP, ALTER)
// ABOUTME: Literal marker parsers shared by the schema, data and post-data filters

use crate::filters::QualifiedName;
use crate::filters::RenameDirective;
use crate::utils::{is_double_quoted, smart_split, unescape};
use anyhow::{Context, Result};
use std::borrow::Cow;

pub const SEARCH_PATH_PREFIX: &str = "SET search_path = ";
const SEARCH_PATH_SUFFIX: &str = ", pg_catalog;";
pub const SET_PREFIX: &str = "SET ";
pub const DROP_PREFIX: &str = "DROP ";
const DROP_TABLE_PREFIXES: [&str; 2] = ["DROP TABLE ", "DROP EXTERNAL TABLE "];
const IF_EXISTS: &str = "IF EXISTS ";
pub const ALTER_TABLE_PREFIX: &str = "ALTER TABLE ";
pub const COPY_PREFIX: &str = "COPY ";
const COPY_SUFFIX: &str = "FROM stdin;";
const COPY_COLUMNS_MARKER: &str = " (";
const COPY_TERMINATOR: &[u8] = b"\\.";

pub const NAME_HEADER_PREFIX: &str = "-- Name: ";
pub const DATA_HEADER_PREFIXES: [&str; 2] = ["-- Data: ", "-- Data for Name: "];
const TYPE_MARKER: &str = "; Type: ";
const SCHEMA_MARKER: &str = "; Schema: ";
const OWNER_MARKER: &str = "; Owner: ";

/// Strip one trailing line terminator (`\n` or `\r\n`).
pub fn trim_line_end(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Position of `marker` in `text` when it occurs exactly once.
fn find_unique(text: &str, marker: &str) -> Option<usize> {
    let mut hits = text.match_indices(marker).map(|(i, _)| i);
    let first = hits.next()?;
    match hits.next() {
        Some(_) => None,
        None => Some(first),
    }
}

/// Decode a dump line for classification. Bytes that are not valid UTF-8
/// become U+FFFD, so names containing them never match a selection entry
/// while the ASCII markers around them still parse.
pub fn decode_line(line: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(line)
}

fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

/// A `SET search_path = <schema>, pg_catalog;` line, kept as raw bytes so a
/// rewrite leaves everything outside the schema untouched.
#[derive(Debug, Clone, Copy)]
pub struct SearchPath<'a> {
    line: &'a [u8],
    start: usize,
    end: usize,
}

impl<'a> SearchPath<'a> {
    /// The suffix is searched from the right so commas inside a quoted
    /// schema name are tolerated.
    pub fn parse(line: &'a [u8]) -> Option<Self> {
        let rest = line.strip_prefix(SEARCH_PATH_PREFIX.as_bytes())?;
        let idx = rfind_bytes(rest, SEARCH_PATH_SUFFIX.as_bytes())?;
        let start = SEARCH_PATH_PREFIX.len();
        Some(Self {
            line,
            start,
            end: start + idx,
        })
    }

    /// Schema text exactly as written in the dump (escaped, possibly quoted).
    pub fn raw(&self) -> Cow<'a, str> {
        let line: &'a [u8] = self.line;
        decode_line(&line[self.start..self.end])
    }

    /// Canonical schema name used for selection lookups.
    pub fn schema(&self) -> String {
        unescape(&self.raw(), false)
    }

    /// The same line with the schema replaced by the rename target. Quoting of
    /// the original text is preserved.
    pub fn rewrite(&self, rename: &RenameDirective) -> Vec<u8> {
        let (start, end) = if is_double_quoted(&self.raw()) {
            (self.start + 1, self.end - 1)
        } else {
            (self.start, self.end)
        };
        let escaped = rename.escaped();
        let mut out = Vec::with_capacity(self.line.len() + escaped.len());
        out.extend_from_slice(&self.line[..start]);
        out.extend_from_slice(escaped.as_bytes());
        out.extend_from_slice(&self.line[end..]);
        out
    }
}

/// Object type tag from a header comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    ExternalTable,
    Acl,
    Schema,
    Constraint,
    FkConstraint,
    Function,
    TableData,
    Index,
    Rule,
    Trigger,
    Other(String),
}

impl ObjectKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "TABLE" => ObjectKind::Table,
            "EXTERNAL TABLE" => ObjectKind::ExternalTable,
            "ACL" => ObjectKind::Acl,
            "SCHEMA" => ObjectKind::Schema,
            "CONSTRAINT" => ObjectKind::Constraint,
            "FK CONSTRAINT" => ObjectKind::FkConstraint,
            "FUNCTION" => ObjectKind::Function,
            "TABLE DATA" => ObjectKind::TableData,
            "INDEX" => ObjectKind::Index,
            "RULE" => ObjectKind::Rule,
            "TRIGGER" => ObjectKind::Trigger,
            other => ObjectKind::Other(other.to_string()),
        }
    }
}

/// Fields of an object-header comment such as
/// `-- Name: t1; Type: TABLE; Schema: public; Owner: gpadmin`.
///
/// Names in header comments are written unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader<'a> {
    pub name: &'a str,
    pub kind: ObjectKind,
    pub schema: &'a str,
}

impl<'a> ObjectHeader<'a> {
    /// Parse a header whose name follows `prefix`.
    ///
    /// Each of the `Type`, `Schema` and `Owner` markers must occur exactly
    /// once and in that order; anything else is not a header we can trust.
    pub fn parse(line: &'a str, prefix: &str) -> Option<Self> {
        let text = line.trim();
        let type_at = find_unique(text, TYPE_MARKER)?;
        let schema_at = find_unique(text, SCHEMA_MARKER)?;
        let owner_at = find_unique(text, OWNER_MARKER)?;

        let name_start = prefix.len();
        let kind_start = type_at + TYPE_MARKER.len();
        let schema_start = schema_at + SCHEMA_MARKER.len();
        if !text.starts_with(prefix)
            || name_start > type_at
            || kind_start > schema_at
            || schema_start > owner_at
        {
            return None;
        }

        Some(Self {
            name: &text[name_start..type_at],
            kind: ObjectKind::from_tag(&text[kind_start..schema_at]),
            schema: &text[schema_start..owner_at],
        })
    }

    /// Parse a `-- Data: ` or `-- Data for Name: ` header.
    pub fn parse_data(line: &'a str) -> Option<Self> {
        let prefix = DATA_HEADER_PREFIXES
            .iter()
            .find(|prefix| line.starts_with(*prefix))?;
        Self::parse(line, prefix)
    }
}

/// Type tag of a header comment, needing only the `Type` and `Schema`
/// markers. Post-data headers are matched this way.
pub fn header_kind(line: &str) -> Option<ObjectKind> {
    let text = line.trim();
    let type_at = find_unique(text, TYPE_MARKER)?;
    let schema_at = find_unique(text, SCHEMA_MARKER)?;
    let kind_start = type_at + TYPE_MARKER.len();
    if kind_start > schema_at {
        return None;
    }
    Some(ObjectKind::from_tag(&text[kind_start..schema_at]))
}

/// Split and unescape a qualified name observed in the stream.
pub fn qualified_from_stream(token: &str) -> Result<QualifiedName> {
    let (schema, table) = smart_split(token)?;
    Ok(QualifiedName::new(
        unescape(schema, false),
        unescape(table, false),
    ))
}

/// True for `DROP TABLE` and `DROP EXTERNAL TABLE` statements.
pub fn is_drop_table(line: &str) -> bool {
    DROP_TABLE_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

/// Target of a `DROP TABLE [IF EXISTS] schema.table;` line.
pub fn drop_table_target(line: &str) -> Result<QualifiedName> {
    let rest = DROP_TABLE_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .context("Not a DROP TABLE statement")?;
    let rest = rest.strip_prefix(IF_EXISTS).unwrap_or(rest);
    let rest = trim_line_end(rest).trim_end();
    let target = rest.strip_suffix(';').unwrap_or(rest).trim();
    qualified_from_stream(target)
}

/// Qualified target of `ALTER TABLE [ONLY] <qualified> ...`, taken as a
/// whitespace-delimited token.
pub fn alter_table_target(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace().skip(2);
    match tokens.next()? {
        "ONLY" => tokens.next(),
        token => Some(token),
    }
}

/// Table name of a `COPY <table> (<columns>) FROM stdin;` header.
///
/// The column list is found by the rightmost ` (` so a table name
/// containing that sequence inside quotes still parses.
pub fn copy_table(line: &str) -> Option<String> {
    let rest = line.strip_prefix(COPY_PREFIX)?;
    let rest = rest.strip_suffix('\n').unwrap_or(rest);
    if !rest.ends_with(COPY_SUFFIX) {
        return None;
    }
    let idx = rest.rfind(COPY_COLUMNS_MARKER)?;
    Some(unescape(&rest[..idx], false))
}

/// True for the `\.` line closing a COPY block.
pub fn is_copy_terminator(line: &[u8]) -> bool {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line == COPY_TERMINATOR
}

/// Table named right after `keyword` in a post-data statement.
///
/// A quoted name runs to the rightmost double quote on the line; an
/// unquoted one ends at the next space or the end of the line.
pub fn table_after_keyword(line: &str, keyword: &str) -> Option<String> {
    let start = line.find(keyword)? + keyword.len();
    let rest = &line[start..];
    let raw = if rest.starts_with('"') {
        let end = line.rfind('"')?;
        if end <= start {
            return None;
        }
        &line[start..=end]
    } else {
        match rest.find(' ') {
            Some(end) => &rest[..end],
            None => rest.trim(),
        }
    };
    if raw.is_empty() {
        return None;
    }
    Some(unescape(raw, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_path_plain() {
        let sp = SearchPath::parse(b"SET search_path = public, pg_catalog;\n").unwrap();
        assert_eq!(sp.raw(), "public");
        assert_eq!(sp.schema(), "public");
    }

    #[test]
    fn test_search_path_quoted_with_comma() {
        let line = "SET search_path = \"a, pg_catalog;\"\"b\", pg_catalog;\n";
        let sp = SearchPath::parse(line.as_bytes()).unwrap();
        assert_eq!(sp.raw(), "\"a, pg_catalog;\"\"b\"");
        assert_eq!(sp.schema(), "a, pg_catalog;\"b");
    }

    #[test]
    fn test_search_path_malformed() {
        assert!(SearchPath::parse(b"SET search_path = public;\n").is_none());
        assert!(SearchPath::parse(b"SET client_encoding = 'UTF8';\n").is_none());
    }

    #[test]
    fn test_search_path_rewrite() {
        let rename = RenameDirective::new("restored").unwrap();
        let sp = SearchPath::parse(b"SET search_path = public, pg_catalog;\n").unwrap();
        assert_eq!(sp.rewrite(&rename), b"SET search_path = restored, pg_catalog;\n");

        let sp = SearchPath::parse(b"SET search_path = \"My Schema\", pg_catalog;\n").unwrap();
        assert_eq!(
            sp.rewrite(&rename),
            b"SET search_path = \"restored\", pg_catalog;\n"
        );
    }

    #[test]
    fn test_search_path_rewrite_only_touches_schema() {
        let rename = RenameDirective::new("x").unwrap();
        let sp = SearchPath::parse(b"SET search_path = pg, pg_catalog;\n").unwrap();
        assert_eq!(sp.rewrite(&rename), b"SET search_path = x, pg_catalog;\n");
    }

    #[test]
    fn test_object_header() {
        let header = ObjectHeader::parse(
            "-- Name: t1; Type: TABLE; Schema: public; Owner: gpadmin; Tablespace: \n",
            NAME_HEADER_PREFIX,
        )
        .unwrap();
        assert_eq!(header.name, "t1");
        assert_eq!(header.kind, ObjectKind::Table);
        assert_eq!(header.schema, "public");
    }

    #[test]
    fn test_object_header_rejects_repeated_marker() {
        let line = "-- Name: a; Type: b; Type: TABLE; Schema: public; Owner: gp\n";
        assert!(ObjectHeader::parse(line, NAME_HEADER_PREFIX).is_none());
        let line = "-- Name: t1; Type: TABLE; Schema: public\n";
        assert!(ObjectHeader::parse(line, NAME_HEADER_PREFIX).is_none());
    }

    #[test]
    fn test_object_header_rejects_out_of_order_markers() {
        let line = "-- Name: t1; Schema: public; Type: TABLE; Owner: gp\n";
        assert!(ObjectHeader::parse(line, NAME_HEADER_PREFIX).is_none());
    }

    #[test]
    fn test_data_headers() {
        let a = ObjectHeader::parse_data(
            "-- Data: t1; Type: TABLE DATA; Schema: public; Owner: gp\n",
        )
        .unwrap();
        assert_eq!(a.name, "t1");
        assert_eq!(a.kind, ObjectKind::TableData);

        let b = ObjectHeader::parse_data(
            "-- Data for Name: t1; Type: TABLE DATA; Schema: public; Owner: gp\n",
        )
        .unwrap();
        assert_eq!(b.name, "t1");
        assert_eq!(b.schema, "public");
    }

    #[test]
    fn test_header_kind() {
        assert_eq!(
            header_kind("-- Name: idx; Type: INDEX; Schema: public; Owner: gp\n"),
            Some(ObjectKind::Index)
        );
        assert_eq!(header_kind("-- Name: idx; Type: INDEX\n"), None);
    }

    #[test]
    fn test_drop_table_target() {
        assert_eq!(
            drop_table_target("DROP TABLE public.t1;\n").unwrap(),
            QualifiedName::new("public", "t1")
        );
        assert_eq!(
            drop_table_target("DROP EXTERNAL TABLE \"S\".\"e\"\"x\";\n").unwrap(),
            QualifiedName::new("S", "e\"x")
        );
        assert_eq!(
            drop_table_target("DROP TABLE IF EXISTS s.t;\n").unwrap(),
            QualifiedName::new("s", "t")
        );
        assert!(drop_table_target("DROP TABLE t1;\n").is_err());
        assert!(is_drop_table("DROP TABLE public.t1;\n"));
        assert!(!is_drop_table("DROP TABLESPACE ts;\n"));
    }

    #[test]
    fn test_alter_table_target() {
        assert_eq!(
            alter_table_target("ALTER TABLE ONLY public.t1\n"),
            Some("public.t1")
        );
        assert_eq!(
            alter_table_target("ALTER TABLE public.t1 ADD CONSTRAINT c PRIMARY KEY (a);\n"),
            Some("public.t1")
        );
        assert_eq!(alter_table_target("ALTER TABLE\n"), None);
    }

    #[test]
    fn test_copy_table() {
        assert_eq!(
            copy_table("COPY t1 (a, b) FROM stdin;\n"),
            Some("t1".to_string())
        );
        assert_eq!(
            copy_table("COPY \"we (ird\"\"\" (a) FROM stdin;\n"),
            Some("we (ird\"".to_string())
        );
        assert_eq!(copy_table("COPY t1 (a) TO stdout;\n"), None);
        assert_eq!(copy_table("COPY t1 FROM stdin;\n"), None);
    }

    #[test]
    fn test_copy_terminator() {
        assert!(is_copy_terminator(b"\\.\n"));
        assert!(is_copy_terminator(b"\\."));
        assert!(!is_copy_terminator(b"\\.x\n"));
        assert!(!is_copy_terminator(b"1\t\\.\n"));
    }

    #[test]
    fn test_table_after_keyword() {
        assert_eq!(
            table_after_keyword("CREATE INDEX idx ON t1 USING btree (a);\n", " ON "),
            Some("t1".to_string())
        );
        assert_eq!(
            table_after_keyword("ALTER TABLE ONLY t1\n", " ONLY "),
            Some("t1".to_string())
        );
        assert_eq!(
            table_after_keyword("ALTER TABLE ONLY \"My \"\"T\"\"\"\n", " ONLY "),
            Some("My \"T\"".to_string())
        );
        assert_eq!(table_after_keyword("CREATE INDEX idx\n", " ON "), None);
    }
}
