// ABOUTME: Identifier quoting helpers for the dump's double-quote convention
// ABOUTME: Splits, validates, escapes and unescapes schema-qualified names

use anyhow::{bail, Result};

/// Returns true when `part` can stand alone as one side of a qualified name.
///
/// A part is valid when it is wrapped in a matching pair of double quotes, or
/// when neither its first nor its last character is a double quote. A stray
/// leading or trailing quote means the dot we split on sits inside a quoted
/// identifier.
///
/// # Examples
///
/// ```
/// # use pg_dump_restore_filter::utils::is_valid_part;
/// assert!(is_valid_part("\"test\""));
/// assert!(is_valid_part("test"));
/// assert!(is_valid_part("test\"1"));
/// assert!(!is_valid_part("\"test"));
/// assert!(!is_valid_part("test\""));
/// ```
pub fn is_valid_part(part: &str) -> bool {
    if part.is_empty() {
        return false;
    }
    let starts = part.starts_with('"');
    let ends = part.ends_with('"');
    (starts && ends && part.len() >= 2) || (!starts && !ends)
}

/// Split a qualified `schema.table` name on the one dot that leaves both
/// sides valid.
///
/// Every dot position is tried. Exactly one must produce two valid parts;
/// zero or several candidates are errors, because guessing would silently
/// restore the wrong object.
///
/// # Examples
///
/// ```
/// # use pg_dump_restore_filter::utils::smart_split;
/// # use anyhow::Result;
/// # fn example() -> Result<()> {
/// assert_eq!(smart_split("ab.cd")?, ("ab", "cd"));
/// assert_eq!(smart_split("\"A\".B\".\"C\"D\"")?, ("\"A\".B\"", "\"C\"D\""));
///
/// // Ambiguous and impossible splits fail
/// assert!(smart_split("\"A\".\"B\".\"C\"").is_err());
/// assert!(smart_split("\"A\".B\".C\"").is_err());
/// # Ok(())
/// # }
/// ```
pub fn smart_split(name: &str) -> Result<(&str, &str)> {
    let mut found: Option<(&str, &str)> = None;

    for (i, _) in name.match_indices('.') {
        let (schema, table) = (&name[..i], &name[i + 1..]);
        if !is_valid_part(schema) || !is_valid_part(table) {
            continue;
        }
        if found.is_some() {
            bail!(
                "Found multiple valid split options for qualified name '{}'",
                sanitize_identifier(name)
            );
        }
        found = Some((schema, table));
    }

    match found {
        Some(parts) => Ok(parts),
        None => bail!(
            "Found no valid split option for qualified name '{}'",
            sanitize_identifier(name)
        ),
    }
}

/// True when `s` is wrapped in double quotes with at least one character
/// between them.
pub fn is_double_quoted(s: &str) -> bool {
    s.len() > 2 && s.starts_with('"') && s.ends_with('"')
}

/// Remove one layer of enclosing double quotes, leaving doubled quotes inside
/// the name untouched.
pub fn strip_enclosing_quotes(s: &str) -> &str {
    if is_double_quoted(s) {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Double every embedded double quote and, when `wrap` is set, enclose the
/// result in double quotes.
///
/// ```
/// # use pg_dump_restore_filter::utils::escape;
/// assert_eq!(escape("my\"table", true), "\"my\"\"table\"");
/// assert_eq!(escape("restored", false), "restored");
/// ```
pub fn escape(identifier: &str, wrap: bool) -> String {
    let doubled = identifier.replace('"', "\"\"");
    if wrap {
        format!("\"{}\"", doubled)
    } else {
        doubled
    }
}

/// Reverse [`escape`]: unless `keep_wrap` is set, strip one layer of
/// surrounding quotes, then collapse every doubled quote to one.
///
/// ```
/// # use pg_dump_restore_filter::utils::{escape, unescape};
/// assert_eq!(unescape("\"my\"\"table\"", false), "my\"table");
/// assert_eq!(unescape(&escape("a\"b", true), false), "a\"b");
/// ```
pub fn unescape(identifier: &str, keep_wrap: bool) -> String {
    let wrapped =
        identifier.len() >= 2 && identifier.starts_with('"') && identifier.ends_with('"');
    let inner = if wrapped && !keep_wrap {
        &identifier[1..identifier.len() - 1]
    } else {
        identifier
    };
    inner.replace("\"\"", "\"")
}

/// Sanitize an identifier (table name, schema name, etc.) for display
///
/// Removes control characters and limits length to prevent log injection and
/// keep error messages readable. Display only, never used for matching.
///
/// ```
/// # use pg_dump_restore_filter::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// assert_eq!(sanitize_identifier(&"a".repeat(200)).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}
