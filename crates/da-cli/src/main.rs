//! DA Table Viewer CLI
//!
//! Command-line tool for scanning, viewing, patching and exporting Dragon Age
//! 2DA tables.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use da_core::{
    apply, merge, merge_family, parse_csv, plan_patch, restore_entry, scan_directory, validate,
    validate_patch, ApplyOptions, BatchFile, Edit, Error, HistoryFile, PatchFile, ResolvedColumn,
    ResolvedTable, ScanResult,
};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const DEFAULT_HISTORY_FILE: &str = ".da-history.json";

#[derive(Parser)]
#[command(name = "da-cli")]
#[command(about = "Dragon Age 2DA Table Viewer", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RootArgs {
    /// Root directories to scan
    #[arg(short, long = "root", required = true)]
    roots: Vec<PathBuf>,
}

impl RootArgs {
    fn scan(&self) -> da_core::Result<ScanResult> {
        scan_directory(&self.roots)
    }
}

/// Roots plus the family to merge from them
#[derive(Args)]
struct TableArgs {
    #[command(flatten)]
    roots: RootArgs,

    /// Family name
    #[arg(short, long)]
    family: String,
}

impl TableArgs {
    fn merge(&self) -> da_core::Result<ResolvedTable> {
        let scan_result = self.roots.scan()?;
        merge(&scan_result, &self.family)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for CSV files and index families
    Scan {
        #[command(flatten)]
        roots: RootArgs,
    },

    /// List all discovered families
    ListFamilies {
        #[command(flatten)]
        roots: RootArgs,

        /// Show member files for each family
        #[arg(short, long)]
        members: bool,
    },

    /// Find families whose name contains a pattern
    Search {
        #[command(flatten)]
        roots: RootArgs,

        /// Case-insensitive substring to look for
        pattern: String,
    },

    /// Show a merged table
    Show {
        #[command(flatten)]
        table: TableArgs,

        /// Maximum number of rows to display
        #[arg(short, long)]
        limit: Option<usize>,

        /// Columns to display (comma-separated)
        #[arg(short, long)]
        columns: Option<String>,
    },

    /// Show the rows of a merged table whose column matches a pattern
    Filter {
        #[command(flatten)]
        table: TableArgs,

        /// Column to match against
        #[arg(long)]
        col: String,

        /// Case-insensitive substring to look for
        pattern: String,

        /// Maximum number of rows to display
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Export a merged table to a file
    Export {
        #[command(flatten)]
        table: TableArgs,

        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Explain the provenance of a specific cell
    Explain {
        #[command(flatten)]
        table: TableArgs,

        /// Row ID
        #[arg(long)]
        row: i64,

        /// Column name
        #[arg(long)]
        col: String,
    },

    /// Parse and display a single CSV file
    Parse {
        /// Path to CSV file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Check a patch file against the scanned tables without writing anything
    Validate {
        #[command(flatten)]
        roots: RootArgs,

        /// Path to patch file (JSON)
        #[arg(short, long)]
        patch: PathBuf,
    },

    /// Apply a patch file and export modified source files
    Patch {
        #[command(flatten)]
        roots: RootArgs,

        /// Path to patch file (JSON)
        #[arg(short, long)]
        patch: PathBuf,

        /// Output directory for modified files
        #[arg(short, long)]
        output: PathBuf,

        /// History file to record the applied patch in
        #[arg(long, env = "DA_HISTORY_FILE", default_value = DEFAULT_HISTORY_FILE)]
        history_file: PathBuf,

        /// Only show which files and cells would change
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a batch of patch operations
    Batch {
        /// Path to batch file (JSON)
        #[arg(short, long)]
        batch: PathBuf,
    },

    /// Create a patch file template
    CreatePatch {
        /// Family name for the patch
        #[arg(short, long)]
        family: String,

        /// Output path for the patch file
        #[arg(short, long)]
        output: PathBuf,

        /// Example edits to include (row_id:column:value)
        #[arg(short, long)]
        example: Vec<String>,
    },

    /// Create a batch file template
    CreateBatch {
        /// Output path for the batch file
        #[arg(short, long)]
        output: PathBuf,

        /// Root directories to include
        #[arg(short, long)]
        root: Vec<PathBuf>,

        /// Output directory for exports
        #[arg(long)]
        export_dir: PathBuf,

        /// History file the batch should record applied patches in
        #[arg(long)]
        history_file: Option<PathBuf>,
    },

    /// Show applied patches, most recent first
    History {
        /// History file to read
        #[arg(long, env = "DA_HISTORY_FILE", default_value = DEFAULT_HISTORY_FILE)]
        history_file: PathBuf,

        /// Only show entries for this family
        #[arg(short, long)]
        family: Option<String>,

        /// Maximum number of entries to display
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Undo the latest patch of a family by restoring the original files
    Restore {
        #[command(flatten)]
        table: TableArgs,

        /// Directory to restore into (defaults to where the patch wrote)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// History file to read
        #[arg(long, env = "DA_HISTORY_FILE", default_value = DEFAULT_HISTORY_FILE)]
        history_file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(command: Commands) -> da_core::Result<()> {
    match command {
        Commands::Scan { roots } => cmd_scan(&roots),
        Commands::ListFamilies { roots, members } => cmd_list_families(&roots, members),
        Commands::Search { roots, pattern } => cmd_search(&roots, &pattern),
        Commands::Show {
            table,
            limit,
            columns,
        } => cmd_show(&table, limit, columns.as_deref()),
        Commands::Filter {
            table,
            col,
            pattern,
            limit,
        } => cmd_filter(&table, &col, &pattern, limit),
        Commands::Export {
            table,
            format,
            output,
        } => cmd_export(&table, format, &output),
        Commands::Explain { table, row, col } => cmd_explain(&table, row, &col),
        Commands::Parse { file } => cmd_parse(&file),
        Commands::Validate { roots, patch } => cmd_validate(&roots, &patch),
        Commands::Patch {
            roots,
            patch,
            output,
            history_file,
            dry_run,
        } => cmd_patch(&roots, &patch, &output, &history_file, dry_run),
        Commands::Batch { batch } => cmd_batch(&batch),
        Commands::CreatePatch {
            family,
            output,
            example,
        } => cmd_create_patch(&family, &output, &example),
        Commands::CreateBatch {
            output,
            root,
            export_dir,
            history_file,
        } => cmd_create_batch(&output, &root, &export_dir, history_file),
        Commands::History {
            history_file,
            family,
            limit,
        } => cmd_history(&history_file, family.as_deref(), limit),
        Commands::Restore {
            table,
            output,
            history_file,
        } => cmd_restore(&table, output.as_deref(), &history_file),
    }
}

fn cmd_scan(roots: &RootArgs) -> da_core::Result<()> {
    let result = roots.scan()?;

    println!("Scanned {} root(s):", result.roots.len());
    for root in &result.roots {
        println!("  {}", root.display());
    }
    println!();
    println!(
        "Found {} files in {} families",
        result.total_files,
        result.families.len()
    );

    if !result.warnings.is_empty() {
        eprintln!("\nWarnings ({}):", result.warnings.len());
        for warning in &result.warnings {
            match &warning.path {
                Some(path) => eprintln!("  {}: {}", path.display(), warning.message),
                None => eprintln!("  {}", warning.message),
            }
        }
    }

    Ok(())
}

fn cmd_list_families(roots: &RootArgs, members: bool) -> da_core::Result<()> {
    let result = roots.scan()?;

    println!("Families ({}):", result.families.len());
    println!();

    for family in &result.families {
        if members {
            println!("{} ({} files)", family.name, family.members.len());
            for member in &family.members {
                let suffix_str = match &member.suffix {
                    Some(s) => format!(" [{}]", s),
                    None => " [base]".to_string(),
                };
                println!("  {}{}", member.path.display(), suffix_str);
            }
            println!();
        } else {
            println!("  {} ({} files)", family.name, family.members.len());
        }
    }

    Ok(())
}

fn cmd_search(roots: &RootArgs, pattern: &str) -> da_core::Result<()> {
    let result = roots.scan()?;
    let matches = result.search_families(pattern);

    println!("{} families match '{}':", matches.len(), pattern);
    for name in matches {
        println!("  {}", name);
    }

    Ok(())
}

fn cmd_show(table: &TableArgs, limit: Option<usize>, columns: Option<&str>) -> da_core::Result<()> {
    let merged = table.merge()?;

    let display_cols: Vec<&ResolvedColumn> = match columns {
        Some(filter) => {
            let wanted: Vec<&str> = filter.split(',').map(str::trim).collect();
            merged
                .columns
                .iter()
                .filter(|c| wanted.contains(&c.name.as_str()))
                .collect()
        }
        None => merged.columns.iter().collect(),
    };

    let all_rows: Vec<usize> = (0..merged.row_count()).collect();
    print_rows(&merged, &display_cols, &all_rows, limit);

    Ok(())
}

fn cmd_filter(
    table: &TableArgs,
    column: &str,
    pattern: &str,
    limit: Option<usize>,
) -> da_core::Result<()> {
    let merged = table.merge()?;
    let matching = merged.filter_rows(column, pattern)?;

    println!(
        "{} of {} rows match '{}' in column '{}'",
        matching.len(),
        merged.row_count(),
        pattern,
        column
    );
    println!();

    let display_cols: Vec<&ResolvedColumn> = merged.columns.iter().collect();
    print_rows(&merged, &display_cols, &matching, limit);

    Ok(())
}

/// Print the given rows of a merged table as tab-separated text
fn print_rows(
    merged: &ResolvedTable,
    display_cols: &[&ResolvedColumn],
    rows: &[usize],
    limit: Option<usize>,
) {
    let header: Vec<&str> = display_cols.iter().map(|c| c.name.as_str()).collect();
    println!("{}", header.join("\t"));
    println!("{}", "-".repeat(header.len() * 12));

    let row_limit = limit.unwrap_or(rows.len());
    for &row_idx in rows.iter().take(row_limit) {
        let values: Vec<String> = display_cols
            .iter()
            .map(|col| {
                merged
                    .cell(row_idx, col.index)
                    .map(|c| c.value.to_string_value())
                    .unwrap_or_default()
            })
            .collect();
        println!("{}", values.join("\t"));
    }

    if rows.len() > row_limit {
        println!("... ({} more rows)", rows.len() - row_limit);
    }
}

fn cmd_export(table: &TableArgs, format: ExportFormat, output: &Path) -> da_core::Result<()> {
    let merged = table.merge()?;

    let file = File::create(output).map_err(|e| Error::FileWrite {
        path: output.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);

    match format {
        ExportFormat::Csv => merged.write_csv(&mut writer)?,
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &merged)?;
            writeln!(writer)?;
        }
    }
    writer.flush()?;

    println!("Exported {} rows to {}", merged.row_count(), output.display());

    Ok(())
}

fn cmd_explain(table: &TableArgs, row_id: i64, col_name: &str) -> da_core::Result<()> {
    let merged = table.merge()?;
    let cell = merged.cell_by_id(row_id, col_name)?;

    println!("Family: {}", merged.family_name);
    println!("Row ID: {}", row_id);
    println!("Column: {}", col_name);
    println!();
    println!("Value: {} ({})", cell.value, cell.value.type_name());
    println!("Source: {}", cell.source.display());
    if let Some(row) = merged.find_row(row_id) {
        println!("Row introduced by: {}", row.introduced_by.display());
    }
    println!();
    println!("Contributing files (merge order):");
    for (i, source) in merged.sources.iter().enumerate() {
        let marker = if source == &cell.source {
            " <-- winner"
        } else {
            ""
        };
        println!("  {}. {}{}", i + 1, source.display(), marker);
    }

    Ok(())
}

fn cmd_parse(file: &Path) -> da_core::Result<()> {
    let table = parse_csv(file)?;

    println!("File: {}", file.display());
    println!("Columns: {}", table.column_count());
    println!("Rows: {}", table.row_count());
    println!();

    let header: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    println!("{}", header.join("\t"));
    println!("{}", "-".repeat(header.len() * 12));

    for row in table.rows.iter().take(10) {
        let values: Vec<String> = row.cells.iter().map(|c| c.to_string_value()).collect();
        println!("{}", values.join("\t"));
    }

    if table.row_count() > 10 {
        println!("... ({} more rows)", table.row_count() - 10);
    }

    Ok(())
}

fn cmd_validate(roots: &RootArgs, patch_path: &Path) -> da_core::Result<()> {
    let json = fs::read_to_string(patch_path).map_err(|e| Error::FileRead {
        path: patch_path.to_path_buf(),
        source: e,
    })?;
    let scan_result = roots.scan()?;

    let errors = validate_patch(&scan_result, &json);
    if errors.is_empty() {
        println!("{}: OK", patch_path.display());
        return Ok(());
    }

    println!("{}: {} problem(s)", patch_path.display(), errors.len());
    for error in &errors {
        println!("  - {}", error);
    }
    Err(Error::Validation(errors))
}

fn cmd_patch(
    roots: &RootArgs,
    patch_path: &Path,
    output_dir: &Path,
    history_file: &Path,
    dry_run: bool,
) -> da_core::Result<()> {
    let patch = PatchFile::load(patch_path)?;
    println!(
        "Loaded patch for family '{}' with {} edits",
        patch.family,
        patch.edits.len()
    );

    let scan_result = roots.scan()?;
    let errors = validate(&scan_result, &patch);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    let family = scan_result.family(&patch.family)?;
    let merged = merge_family(family)?;
    println!(
        "Merged {} rows from {} source files",
        merged.row_count(),
        merged.sources.len()
    );

    let plan = plan_patch(family, &merged, &patch)?;
    println!("\nFiles to be modified:");
    for (source, edits) in &plan.edits_by_source {
        println!("  {} ({} edits)", source.display(), edits.len());
        for edit in edits {
            let current = plan
                .current_value(&merged, edit)
                .map(|v| v.to_string_value())
                .unwrap_or_default();
            println!(
                "    row {}, '{}': '{}' -> '{}'",
                edit.row_id, edit.column, current, edit.value
            );
        }
    }

    if dry_run {
        println!("\nDry run, nothing written.");
        return Ok(());
    }

    let options = ApplyOptions {
        history_path: Some(history_file),
        patch_file: Some(patch_path),
    };
    let result = apply(&scan_result, &patch, output_dir, &options)?;

    println!("\nExport complete:");
    println!(
        "  {} files written to {}",
        result.exported.len(),
        output_dir.display()
    );
    println!("  {} edits applied", result.edits_applied);
    for path in &result.exported {
        println!("  - {}", path.display());
    }
    println!("  recorded in {}", history_file.display());

    Ok(())
}

fn cmd_batch(batch_path: &Path) -> da_core::Result<()> {
    let batch = BatchFile::load(batch_path)?;

    println!("Running batch with {} patch files", batch.patches.len());
    println!("Roots: {:?}", batch.roots);
    println!("Output: {}", batch.output_dir.display());
    println!();

    let mut total_edits = 0;
    let mut total_files = 0;
    let mut failures = Vec::new();

    for outcome in batch.run()? {
        println!("Processing patch: {}", outcome.patch.display());
        match outcome.result {
            Ok(result) => {
                total_edits += result.edits_applied;
                total_files += result.exported.len();
                println!(
                    "  Applied {} edits, wrote {} files",
                    result.edits_applied,
                    result.exported.len()
                );
            }
            Err(e) => {
                println!("  Failed: {}", e);
                failures.push((outcome.patch, e));
            }
        }
    }

    println!();
    println!("Batch complete:");
    println!("  {} total edits applied", total_edits);
    println!("  {} total files written", total_files);

    if failures.is_empty() {
        return Ok(());
    }

    println!("\nErrors ({}):", failures.len());
    for (path, err) in &failures {
        println!("  {}: {}", path.display(), err);
    }
    // Exit non-zero with the first failure
    match failures.into_iter().next() {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

fn cmd_create_patch(family: &str, output: &Path, examples: &[String]) -> da_core::Result<()> {
    let mut patch = PatchFile::new(family);

    // Parse example edits: "row_id:column:value"
    for example in examples {
        let parts: Vec<&str> = example.splitn(3, ':').collect();
        if parts.len() != 3 {
            eprintln!(
                "Warning: Invalid example format '{}', expected 'row_id:column:value'",
                example
            );
            continue;
        }

        let row_id: i64 = match parts[0].parse() {
            Ok(id) => id,
            Err(_) => {
                eprintln!("Warning: Invalid row_id '{}' in example", parts[0]);
                continue;
            }
        };

        patch.add_edit(Edit::new(row_id, parts[1], parts[2]));
    }

    patch.save(output)?;
    println!("Created patch file: {}", output.display());
    println!("Family: {}", family);
    println!("Edits: {}", patch.edits.len());
    println!();
    println!("Edit the file to add your changes, then run:");
    println!(
        "  da-cli patch --root <path> --patch {} --output <dir>",
        output.display()
    );

    Ok(())
}

fn cmd_create_batch(
    output: &Path,
    roots: &[PathBuf],
    export_dir: &Path,
    history_file: Option<PathBuf>,
) -> da_core::Result<()> {
    let batch = BatchFile {
        roots: roots.to_vec(),
        output_dir: export_dir.to_path_buf(),
        patches: vec![PathBuf::from("patch1.json"), PathBuf::from("patch2.json")],
        history_file,
    };

    batch.save(output)?;
    println!("Created batch file: {}", output.display());
    println!();
    println!("Edit the file to configure your batch, then run:");
    println!("  da-cli batch --batch {}", output.display());

    Ok(())
}

fn cmd_history(
    history_file: &Path,
    family: Option<&str>,
    limit: Option<usize>,
) -> da_core::Result<()> {
    let history = HistoryFile::load(history_file)?;
    let entries: Vec<_> = history
        .newest_first()
        .into_iter()
        .filter(|e| family.map_or(true, |f| e.family == f))
        .collect();

    if entries.is_empty() {
        println!("No history in {}", history_file.display());
        return Ok(());
    }

    let shown = limit.unwrap_or(entries.len());
    for entry in entries.iter().take(shown) {
        println!(
            "{}  {}  {} edits",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.family,
            entry.edit_count
        );
        if let Some(patch_file) = &entry.patch_file {
            println!("  patch: {}", patch_file.display());
        }
        for path in &entry.exported {
            println!("  - {}", path.display());
        }
    }

    if entries.len() > shown {
        println!("... ({} more entries)", entries.len() - shown);
    }

    Ok(())
}

fn cmd_restore(
    table: &TableArgs,
    output: Option<&Path>,
    history_file: &Path,
) -> da_core::Result<()> {
    let family = table.family.as_str();
    let history = HistoryFile::load(history_file)?;
    let Some(entry) = history.latest_for_family(family) else {
        println!("No history for family '{}'", family);
        return Ok(());
    };

    let output_dir = match output {
        Some(dir) => dir.to_path_buf(),
        None => entry
            .exported
            .first()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let scan_result = table.roots.scan()?;
    let restored = restore_entry(&scan_result, entry, &output_dir)?;

    println!(
        "Restored {} original files of '{}' (patch of {})",
        restored.len(),
        family,
        entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for path in &restored {
        println!("  - {}", path.display());
    }

    Ok(())
}
