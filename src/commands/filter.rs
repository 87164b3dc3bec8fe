// ABOUTME: Restore filter command: loads selection and rename, then streams one filter
// ABOUTME: Validates startup inputs before any output and persists file output atomically

use crate::config::FilterConfig;
use crate::filters::{RenameDirective, SelectionSet};
use crate::restore::{
    run_filter, DataFilter, FilterStats, PostDataFilter, RestoreMode, SchemaFilter,
};
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Inputs of one filter run, merged from CLI flags and the config file
#[derive(Debug, Default)]
pub struct FilterOptions {
    pub table_file: Option<PathBuf>,
    pub schemas: Vec<String>,
    pub change_schema_file: Option<PathBuf>,
    pub change_schema: Option<String>,
    pub config: Option<FilterConfig>,
    /// Dump to read; stdin when unset
    pub input: Option<PathBuf>,
    /// Destination; stdout when unset
    pub output: Option<PathBuf>,
    pub progress: bool,
}

impl FilterOptions {
    fn uses_schema_level_selection(&self) -> bool {
        !self.schemas.is_empty()
            || self
                .config
                .as_ref()
                .is_some_and(|config| !config.schemas.is_empty())
    }
}

/// Build the selection from the table file, `--schema` flags and config.
pub fn build_selection(options: &FilterOptions) -> Result<SelectionSet> {
    let mut selection = match &options.table_file {
        Some(path) => SelectionSet::load_from_file(path)?,
        None => SelectionSet::empty(),
    };
    for schema in &options.schemas {
        selection.add_schema(schema)?;
    }
    if let Some(config) = &options.config {
        selection.merge(config.selection()?);
    }

    if selection.is_empty() {
        bail!(
            "No tables selected for restore.\n\
             Provide a table file (--table-file), --schema, or 'tables'/'schemas' in --config"
        );
    }
    Ok(selection)
}

/// Resolve the optional rename directive and check it against the mode and
/// the selection style.
pub fn build_rename(mode: RestoreMode, options: &FilterOptions) -> Result<Option<RenameDirective>> {
    if options.change_schema_file.is_some() && options.change_schema.is_some() {
        bail!("Cannot use both --change-schema-file and --change-schema");
    }

    let rename = if let Some(path) = &options.change_schema_file {
        Some(RenameDirective::load_from_file(path)?)
    } else if let Some(schema) = &options.change_schema {
        Some(RenameDirective::new(schema.as_str())?)
    } else if let Some(config) = &options.config {
        config.rename()?
    } else {
        None
    };

    let Some(rename) = rename else {
        return Ok(None);
    };
    if mode == RestoreMode::PostData {
        bail!("Changing the schema is not supported in post-data mode");
    }
    if options.uses_schema_level_selection() {
        bail!("Cannot use both --schema and --change-schema (schema-level restore keeps schema names)");
    }
    Ok(Some(rename))
}

/// Run the filter for `mode` over an already-open input and output.
pub fn filter_stream<R: BufRead, W: Write>(
    mode: RestoreMode,
    selection: &SelectionSet,
    rename: Option<&RenameDirective>,
    input: R,
    output: W,
) -> Result<FilterStats> {
    match mode {
        RestoreMode::Schema => run_filter(&mut SchemaFilter::new(selection, rename), input, output),
        RestoreMode::Data => run_filter(&mut DataFilter::new(selection, rename), input, output),
        RestoreMode::PostData => run_filter(&mut PostDataFilter::new(selection), input, output),
    }
}

/// Load inputs, validate them, and stream the dump through the filter for
/// `mode`. Nothing is written unless startup succeeds.
pub fn filter(mode: RestoreMode, options: &FilterOptions) -> Result<FilterStats> {
    let selection = build_selection(options)?;
    let rename = build_rename(mode, options)?;

    tracing::info!(
        "Filtering {} section: {} table entries across {} schemas",
        mode,
        selection.tables().len(),
        selection.schemas().len()
    );
    if let Some(rename) = &rename {
        tracing::info!("Restoring into schema '{}'", rename.schema());
    }

    let (input, progress) = open_input(options.input.as_deref(), options.progress)?;

    let stats = match &options.output {
        Some(path) => write_atomically(path, |writer| {
            filter_stream(mode, &selection, rename.as_ref(), input, writer)
        })?,
        None => {
            let stdout = io::stdout();
            let writer = BufWriter::new(stdout.lock());
            filter_stream(mode, &selection, rename.as_ref(), input, writer)?
        }
    };

    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    tracing::info!(
        "✓ Filtered {} lines, emitted {} lines ({} bytes), selection {}",
        stats.lines_read,
        stats.lines_emitted,
        stats.bytes_emitted,
        &selection.fingerprint()[..12]
    );
    Ok(stats)
}

fn open_input(path: Option<&Path>, progress: bool) -> Result<(Box<dyn BufRead>, Option<ProgressBar>)> {
    let Some(path) = path else {
        return Ok((Box::new(io::stdin().lock()), None));
    };

    let file = File::open(path)
        .with_context(|| format!("Failed to open dump file at {}", path.display()))?;
    if !progress {
        return Ok((Box::new(BufReader::new(file)), None));
    }

    let len = file
        .metadata()
        .with_context(|| format!("Failed to stat dump file at {}", path.display()))?
        .len();
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%)",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    Ok((Box::new(BufReader::new(bar.wrap_read(file))), Some(bar)))
}

/// Write through a temp file next to `path` and move it into place only when
/// `write` succeeds.
fn write_atomically<T>(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<&mut File>) -> Result<T>,
) -> Result<T> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp output in {}", parent.display()))?;

    let result = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let result = write(&mut writer)?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush output for {}", path.display()))?;
        result
    };

    tmp.persist(path)
        .with_context(|| format!("Failed to persist output at {}", path.display()))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn table_file(lines: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "{}", lines).unwrap();
        tmp
    }

    #[test]
    fn test_build_selection_requires_entries() {
        let err = build_selection(&FilterOptions::default()).unwrap_err();
        assert!(err.to_string().contains("No tables selected"));
    }

    #[test]
    fn test_build_selection_merges_sources() {
        let tmp = table_file("public.t1\n");
        let options = FilterOptions {
            table_file: Some(tmp.path().to_path_buf()),
            schemas: vec!["sales".to_string()],
            config: Some(FilterConfig {
                tables: vec!["hr.people".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let selection = build_selection(&options).unwrap();
        assert!(selection.contains_table("public", "t1"));
        assert!(selection.contains_table("sales", "x"));
        assert!(selection.contains_table("hr", "people"));
    }

    #[test]
    fn test_rename_conflicts_with_schema_level_selection() {
        let options = FilterOptions {
            schemas: vec!["sales".to_string()],
            change_schema: Some("restored".to_string()),
            ..Default::default()
        };
        let err = build_rename(RestoreMode::Schema, &options).unwrap_err();
        assert!(err.to_string().contains("Cannot use both --schema and --change-schema"));
    }

    #[test]
    fn test_rename_rejected_in_post_data_mode() {
        let options = FilterOptions {
            change_schema: Some("restored".to_string()),
            ..Default::default()
        };
        assert!(build_rename(RestoreMode::PostData, &options).is_err());
        assert!(build_rename(RestoreMode::Data, &options).unwrap().is_some());
    }

    #[test]
    fn test_rename_file_and_inline_conflict() {
        let tmp = table_file("restored\n");
        let options = FilterOptions {
            change_schema_file: Some(tmp.path().to_path_buf()),
            change_schema: Some("other".to_string()),
            ..Default::default()
        };
        assert!(build_rename(RestoreMode::Schema, &options).is_err());
    }

    #[test]
    fn test_filter_writes_output_file() {
        let tables = table_file("public.t1\n");
        let dump = table_file(
            "SET search_path = public, pg_catalog;\nCOPY t1 (a) FROM stdin;\n1\n\\.\nCOPY t2 (a) FROM stdin;\n2\n\\.\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("filtered.sql");

        let options = FilterOptions {
            table_file: Some(tables.path().to_path_buf()),
            input: Some(dump.path().to_path_buf()),
            output: Some(out_path.clone()),
            ..Default::default()
        };
        let stats = filter(RestoreMode::Data, &options).unwrap();

        let written = std::fs::read_to_string(&out_path).unwrap();
        assert_eq!(
            written,
            "SET search_path = public, pg_catalog;\nCOPY t1 (a) FROM stdin;\n1\n\\.\n"
        );
        assert_eq!(stats.lines_read, 7);
        assert_eq!(stats.lines_emitted, 4);
    }

    #[test]
    fn test_startup_error_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("filtered.sql");
        let options = FilterOptions {
            table_file: Some(dir.path().join("missing")),
            output: Some(out_path.clone()),
            ..Default::default()
        };
        assert!(filter(RestoreMode::Schema, &options).is_err());
        assert!(!out_path.exists());
    }
}
