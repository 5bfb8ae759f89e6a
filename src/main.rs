use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use clap::{ArgAction, ColorChoice, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use comfy_table::{ContentArrangement, Table};
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};

mod aggregate;
mod catalog;
mod detail;
mod export;
mod extract;
mod identity;
mod locate;
mod report;

use aggregate::{AggregateTable, COL_KEY, ConflictPolicy};
use catalog::FieldSpec;

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

const DEFAULT_XLSX: &str = "statistiques_SEQ01_SEQ02.xlsx";

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum OutputFmt { Table, Json }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "seqstat",
    about = "SEQ-01/SEQ-02 test report aggregator",
    long_about = "Aggregates measurements and verdicts from SEQ-01/SEQ-02 HTML test reports into one spreadsheet row per test run, with out-of-bounds highlighting.",
    after_long_help = "Examples:\n  seqstat ./campagne_2025\n  seqstat ./campagne_2025 --fields 24VDC_+16V,24VDC_-16V --xlsx alim.xlsx\n  seqstat ./campagne_2025 --no-sort --csv-path stats.csv --output json\n  seqstat ./campagne_2025 --detail --progress",
    color = ColorChoice::Auto
)]
struct Args {
    /// Root directory holding one subdirectory per serial number
    #[arg(value_name = "ROOT")]
    root: Option<String>,
    /// Field ids or display names to extract (default: whole catalog)
    #[arg(long, short = 'f', num_args = 0.., value_delimiter = ',')]
    fields: Vec<String>,
    #[arg(long, default_value_t = false, help = "List the field catalog and exit")]
    list_fields: bool,
    #[arg(long, default_value_t = false, help = "Keep rows in plain key order instead of chronological order")]
    no_sort: bool,
    #[arg(long, default_value_t = false, help = "Sort on the serial's trailing 4 digits")]
    serial_tail4: bool,
    /// Policy when two reports disagree on a merged field
    #[arg(long, value_enum, default_value = "keep-last")]
    on_conflict: ConflictPolicy,
    #[arg(long, help = "Spreadsheet output path (default: <ROOT>/statistiques_SEQ01_SEQ02.xlsx)")]
    xlsx: Option<String>,
    #[arg(long, default_value_t = false)]
    no_xlsx: bool,
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long)]
    tsv_path: Option<String>,
    #[arg(long)]
    json_path: Option<String>,
    /// Report file encoding label
    #[arg(long, default_value = "iso-8859-1")]
    encoding: String,
    #[arg(long, short = 'g', help = "Extra glob filter on report paths")]
    file_glob: Option<String>,
    #[arg(long, default_value_t = false, help = "Also write a detailed text report into each serial directory")]
    detail: bool,
    #[arg(long, short = 'o', value_enum, default_value = "table")]
    output: OutputFmt,
    #[arg(long, short = 'n', default_value_t = 0, help = "Preview at most N rows (0 = all)")]
    top: usize,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
    #[arg(long)]
    config: Option<String>,
}

#[derive(Deserialize)]
struct AppConfig {
    root: Option<String>,
    fields: Option<Vec<String>>,
    no_sort: Option<bool>,
    serial_tail4: Option<bool>,
    on_conflict: Option<ConflictPolicy>,
    xlsx: Option<String>,
    no_xlsx: Option<bool>,
    csv_path: Option<String>,
    tsv_path: Option<String>,
    json_path: Option<String>,
    encoding: Option<String>,
    file_glob: Option<String>,
    detail: Option<bool>,
    output: Option<OutputFmt>,
    top: Option<usize>,
    progress: Option<bool>,
    log_format: Option<LogFormat>,
    log_path: Option<String>,
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.root.is_none() && let Some(v) = cfg.root { args.root = Some(v); }
    if args.fields.is_empty() && let Some(v) = cfg.fields { args.fields = v; }
    if !args.no_sort && let Some(v) = cfg.no_sort { args.no_sort = v; }
    if !args.serial_tail4 && let Some(v) = cfg.serial_tail4 { args.serial_tail4 = v; }
    if let Some(v) = cfg.on_conflict { args.on_conflict = v; }
    if args.xlsx.is_none() && let Some(v) = cfg.xlsx { args.xlsx = Some(v); }
    if !args.no_xlsx && let Some(v) = cfg.no_xlsx { args.no_xlsx = v; }
    if args.csv_path.is_none() && let Some(v) = cfg.csv_path { args.csv_path = Some(v); }
    if args.tsv_path.is_none() && let Some(v) = cfg.tsv_path { args.tsv_path = Some(v); }
    if args.json_path.is_none() && let Some(v) = cfg.json_path { args.json_path = Some(v); }
    if args.encoding == "iso-8859-1" && let Some(v) = cfg.encoding { args.encoding = v; }
    if args.file_glob.is_none() && let Some(v) = cfg.file_glob { args.file_glob = Some(v); }
    if !args.detail && let Some(v) = cfg.detail { args.detail = v; }
    if let Some(v) = cfg.output { args.output = v; }
    if args.top == 0 && let Some(v) = cfg.top { args.top = v; }
    if !args.progress && let Some(v) = cfg.progress { args.progress = v; }
    if args.log_format.is_none() && let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
}

fn main() {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "seqstat", &mut f); } else { clap_complete::generate(sh, &mut cmd, "seqstat", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "seqstat", &mut std::io::stdout());
        }
        return;
    }
    if let Some(p) = args.config.as_ref()
        && let Ok(s) = std::fs::read_to_string(p)
        && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    else {
        let def = "seqstat.toml";
        if let Ok(s) = std::fs::read_to_string(def)
            && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    }
    init_logger(&args);
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);

    if args.list_fields {
        print_catalog();
        return;
    }

    let Some(encoding) = report::encoding_for_label(&args.encoding) else {
        log::error!("unknown encoding label {:?}", args.encoding);
        std::process::exit(2);
    };
    let Some(root) = args.root.as_ref().map(PathBuf::from) else {
        log::error!("no root directory given, see --help");
        std::process::exit(2);
    };

    let specs = selected_specs(&args.fields);
    if specs.is_empty() {
        log::error!("no valid field selected, see --list-fields");
        std::process::exit(2);
    }

    let files = match locate::find_reports(&root, args.file_glob.as_deref()) {
        Ok(f) => f,
        Err(e) => { log::error!("{e:#}"); std::process::exit(2); }
    };
    let n_seq01 = files.iter().filter(|f| f.kind == catalog::SeqKind::Seq01).count();
    log::info!("{} SEQ-01 and {} SEQ-02 files found", n_seq01, files.len() - n_seq01);
    if files.is_empty() {
        println!("Aucun fichier SEQ-01 ou SEQ-02 trouvé sous {}", root.display());
        return;
    }

    let bar = if args.progress { Some(indicatif::ProgressBar::new(files.len() as u64)) } else { None };
    let mut on_file = |_i: usize, p: &Path| {
        if let Some(b) = &bar {
            b.set_message(p.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default());
            b.inc(1);
        }
    };
    let table = aggregate::aggregate(&files, &specs, args.on_conflict, encoding, Some(&mut on_file));
    if let Some(b) = &bar { b.finish_and_clear(); }
    if table.is_empty() {
        println!("Aucune donnée collectée.");
        return;
    }

    let keys = table.sorted_keys(!args.no_sort, args.serial_tail4);
    let columns = table.columns(&specs);

    match args.output {
        OutputFmt::Table => {
            if !args.quiet { print_preview(&table, &keys, &columns, args.top); }
        }
        OutputFmt::Json => {
            println!("{}", serde_json::to_string_pretty(&table_json(&table, &keys)).unwrap_or_default());
        }
    }

    if !args.no_xlsx {
        let path = args.xlsx.as_ref().map(PathBuf::from).unwrap_or_else(|| root.join(DEFAULT_XLSX));
        match export::write_xlsx(&path, &table, &keys, &columns) {
            Ok(()) => { if !args.quiet { println!("{}", paint(&format!("Excel written: {}", path.display()), "1;36")); } }
            Err(e) => { log::error!("Excel write failed: {e:#}"); std::process::exit(1); }
        }
    }
    if let Some(p) = args.csv_path.as_ref() {
        if let Err(e) = write_csv(p, &table, &keys, &columns, b',') { log::error!("CSV write failed for {p}: {e}"); } else if !args.quiet { println!("{}", paint(&format!("CSV written: {p}"), "1;36")); }
    }
    if let Some(p) = args.tsv_path.as_ref() {
        if let Err(e) = write_csv(p, &table, &keys, &columns, b'\t') { log::error!("TSV write failed for {p}: {e}"); } else if !args.quiet { println!("{}", paint(&format!("TSV written: {p}"), "1;36")); }
    }
    if let Some(p) = args.json_path.as_ref() {
        match serde_json::to_string_pretty(&table_json(&table, &keys)) {
            Ok(s) => {
                if let Err(e) = std::fs::write(p, s) { log::error!("JSON write failed for {p}: {e}"); }
                else if !args.quiet { println!("{}", paint(&format!("JSON written: {p}"), "1;36")); }
            }
            Err(e) => log::error!("JSON encode failed: {e}"),
        }
    }

    if args.detail {
        run_detail(&root, encoding, args.progress, args.quiet);
    }
}

fn init_logger(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if args.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if let Some(lvl) = args.log_level {
        let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
        builder.filter_level(f);
    } else if args.verbose > 0 {
        let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
        builder.filter_level(f);
    }
    if let Some(fmt) = args.log_format {
        match fmt {
            LogFormat::Json => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    let ts = chrono::Local::now().to_rfc3339();
                    let obj = serde_json::json!({
                        "ts": ts,
                        "level": record.level().to_string(),
                        "target": record.target(),
                        "msg": record.args().to_string(),
                    });
                    writeln!(buf, "{}", obj)
                });
            }
            LogFormat::Text => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    let ts = chrono::Local::now().format("%H:%M:%S");
                    writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                });
            }
        }
    }
    if let Some(path) = args.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
            Err(e) => { eprintln!("Failed to open log file {}: {}", path, e); }
        }
    }
    builder.init();
}

fn selected_specs(wanted: &[String]) -> Vec<&'static FieldSpec> {
    if wanted.is_empty() {
        return catalog::CATALOG.iter().collect();
    }
    let mut specs = vec![];
    for w in wanted {
        match catalog::find(w) {
            Some(s) => specs.push(s),
            None => log::warn!("unknown field {w:?}, skipping"),
        }
    }
    specs
}

fn print_catalog() {
    let mut t = Table::new();
    t.set_content_arrangement(ContentArrangement::Dynamic);
    t.set_header(vec!["id", "name", "type"]);
    for s in catalog::CATALOG {
        t.add_row(vec![s.id, s.name, s.kind.prefix()]);
    }
    println!("{t}");
}

fn print_preview(table: &AggregateTable, keys: &[String], columns: &[String], top: usize) {
    let mut t = Table::new();
    t.set_content_arrangement(ContentArrangement::Dynamic);
    let mut header = vec![COL_KEY.to_string()];
    header.extend(columns.iter().cloned());
    t.set_header(header);
    let shown = if top > 0 { top.min(keys.len()) } else { keys.len() };
    for key in &keys[..shown] {
        let Some(record) = table.records.get(key) else { continue };
        let mut row = vec![key.clone()];
        row.extend(columns.iter().map(|c| record.get(c).cloned().unwrap_or_default()));
        t.add_row(row);
    }
    println!("{t}");
    if shown < keys.len() {
        println!("... {} more rows", keys.len() - shown);
    }
}

fn table_json(table: &AggregateTable, keys: &[String]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for key in keys {
        if let Some(record) = table.records.get(key) {
            map.insert(key.clone(), serde_json::to_value(record).unwrap_or(serde_json::Value::Null));
        }
    }
    serde_json::Value::Object(map)
}

fn write_csv(path: &str, table: &AggregateTable, keys: &[String], columns: &[String], delimiter: u8) -> Result<(), std::io::Error> {
    let mut wtr = csv::WriterBuilder::new().delimiter(delimiter).from_path(path)?;
    let mut header = vec![COL_KEY.to_string()];
    header.extend(columns.iter().cloned());
    wtr.write_record(&header)?;
    for key in keys {
        let Some(record) = table.records.get(key) else { continue };
        let mut row = vec![key.clone()];
        row.extend(columns.iter().map(|c| record.get(c).cloned().unwrap_or_default()));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn run_detail(root: &Path, encoding: &'static encoding_rs::Encoding, progress: bool, quiet: bool) {
    let dirs = match locate::serial_dirs(root) {
        Ok(d) => d,
        Err(e) => { log::error!("{e:#}"); return; }
    };
    let bar = if progress { Some(indicatif::ProgressBar::new(dirs.len() as u64)) } else { None };
    let mut sink = |_i: usize, d: &Path| {
        if let Some(b) = &bar {
            b.set_message(d.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default());
            b.inc(1);
        }
    };
    match detail::process_root(root, encoding, &mut sink) {
        Ok(n) => {
            if let Some(b) = &bar { b.finish_and_clear(); }
            if !quiet { println!("{}", paint(&format!("Detailed reports written: {n}"), "1;36")); }
        }
        Err(e) => log::error!("detailed report generation failed: {e:#}"),
    }
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&false) {
        format!("\x1b[{}m{}\x1b[0m", code, s)
    } else {
        s.to_string()
    }
}
