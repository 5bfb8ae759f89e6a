use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use anyhow::{Context, Result};
use encoding_rs::Encoding;
use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::extract::{self, cell_text};
use crate::locate;
use crate::report::ReportDoc;

/// One failed or terminated test block inside a report.
#[derive(Clone, Debug)]
pub struct FailedTest {
    pub name: String,
    pub status: String,
    pub detail: Vec<String>,
}

/// Findings for one report file of a serial directory.
#[derive(Clone, Debug)]
pub struct ReportFindings {
    pub display_name: String,
    pub overall: String,
    pub failures: Vec<FailedTest>,
}

fn tr_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("tr").unwrap())
}

fn td_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("td").unwrap())
}

fn class_cell<'a>(row: ElementRef<'a>, class: &str) -> Option<ElementRef<'a>> {
    row.select(td_selector()).find(|td| {
        td.value().attr("class").map(|c| c.split_whitespace().any(|k| k == class)).unwrap_or(false)
    })
}

fn title_cell(row: ElementRef<'_>) -> Option<String> {
    row.select(td_selector())
        .find(|td| td.value().attr("colspan") == Some("2"))
        .map(cell_text)
        .filter(|t| !t.is_empty())
}

fn row_text(row: ElementRef<'_>) -> String {
    let parts: Vec<String> = row
        .select(td_selector())
        .map(cell_text)
        .filter(|t| !t.is_empty())
        .collect();
    parts.join(" ")
}

/// `SEQ-01_LPVT_Report[15 35 54][27 01 2025].html` → `SEQ-01 [27 01 2025] [15 35 54]`.
/// Names outside that shape pass through unchanged.
pub fn display_name(file_name: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(SEQ-\d+)_.*\[([^\]]+)\]\[([^\]]+)\]\.[Hh][Tt][Mm][Ll]?$").unwrap());
    match re.captures(file_name) {
        Some(c) => format!("{} [{}] [{}]", &c[1], &c[3], &c[2]),
        None => file_name.to_string(),
    }
}

/// Collect the global verdict and every failed or terminated test block.
/// A block's name comes from the `colspan="2"` title row right above its
/// `Status:` row; its detail is every following row up to the next status.
pub fn analyze_report(doc: &ReportDoc, file_name: &str) -> ReportFindings {
    let rows: Vec<ElementRef<'_>> = doc.dom.select(tr_selector()).collect();
    let mut failures = vec![];
    for (i, row) in rows.iter().enumerate() {
        let Some(label) = class_cell(*row, "label") else { continue };
        if !cell_text(label).contains("Status:") { continue; }
        let Some(value) = class_cell(*row, "value") else { continue };
        let status = cell_text(value);
        if status != "Failed" && status != "Terminated" { continue; }
        let name = i.checked_sub(1)
            .and_then(|p| title_cell(rows[p]))
            .unwrap_or_else(|| "Nom de test inconnu".to_string());
        let mut detail = vec![];
        for next in &rows[i + 1..] {
            if title_cell(*next).is_some() { break; }
            if let Some(l) = class_cell(*next, "label") && cell_text(l).contains("Status:") { break; }
            let t = row_text(*next);
            if !t.is_empty() { detail.push(t); }
        }
        failures.push(FailedTest { name, status, detail });
    }
    ReportFindings {
        display_name: display_name(file_name),
        overall: extract::uut_status(doc),
        failures,
    }
}

/// Render the per-serial text report, one block per analyzed file.
pub fn render(serial: &str, findings: &[ReportFindings]) -> String {
    let sep = "-".repeat(70);
    let mut s = String::new();
    s.push_str(&format!("Numéro de série : {serial}\n"));
    s.push_str(&sep);
    s.push('\n');
    for f in findings {
        s.push_str(&format!("{} :\n\n", f.display_name));
        s.push_str(&format!("1. Résultat global du test : \"{}\"\n", f.overall));
        if f.overall.eq_ignore_ascii_case("terminated") {
            s.push_str("   Le test global a été interrompu avant d'être complété.\n");
        }
        if f.failures.is_empty() {
            s.push_str("\n2. Aucun test en échec.\n\n");
        } else {
            s.push_str("\n2. Tests en échec :\n");
            for (idx, t) in f.failures.iter().enumerate() {
                let tag = if t.status == "Failed" { "(rouge)".to_string() } else { format!("({})", t.status.to_lowercase()) };
                s.push_str(&format!("   {}) {}\n", idx + 1, t.name));
                s.push_str(&format!("      Statut : {} {}\n", t.status, tag));
                for line in &t.detail {
                    s.push_str(&format!("      {line}\n"));
                }
                s.push('\n');
            }
        }
        s.push_str(&sep);
        s.push('\n');
    }
    s
}

/// Analyze every HTML report of one serial-number directory and write the
/// `<serial>_LPVT.txt` summary next to them. Returns the written path, or
/// `None` when the directory holds no reports.
pub fn process_serial_dir(dir: &Path, encoding: &'static Encoding) -> Result<Option<PathBuf>> {
    let serial = dir.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| { let l = n.to_lowercase(); l.ends_with(".html") || l.ends_with(".htm") })
        .collect();
    if names.is_empty() { return Ok(None); }
    names.sort();
    let mut findings = vec![];
    for name in &names {
        let doc = match ReportDoc::from_path(&dir.join(name), encoding) {
            Ok(d) => d,
            Err(e) => { log::error!("cannot read {}: {e}", dir.join(name).display()); continue }
        };
        findings.push(analyze_report(&doc, name));
    }
    let out = dir.join(format!("{serial}_LPVT.txt"));
    std::fs::write(&out, render(&serial, &findings))
        .with_context(|| format!("cannot write {}", out.display()))?;
    Ok(Some(out))
}

/// Drive the generator over every serial subdirectory of the root. The
/// progress sink fires once per directory; one directory's failure is
/// logged and does not stop the rest.
pub fn process_root(root: &Path, encoding: &'static Encoding, progress: &mut dyn FnMut(usize, &Path)) -> Result<usize> {
    let dirs = locate::serial_dirs(root)?;
    let mut written = 0;
    for (i, dir) in dirs.iter().enumerate() {
        progress(i, dir);
        match process_serial_dir(dir, encoding) {
            Ok(Some(_)) => written += 1,
            Ok(None) => log::info!("no reports in {}", dir.display()),
            Err(e) => log::error!("detailed report failed for {}: {e:#}", dir.display()),
        }
    }
    Ok(written)
}
