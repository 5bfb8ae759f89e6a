use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::catalog::SeqKind;

/// A discovered report file and the sequence kind inferred from its name.
#[derive(Clone, Debug)]
pub struct ReportFile {
    pub path: PathBuf,
    pub kind: SeqKind,
}

fn report_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
}

/// Recursively collect SEQ-01/SEQ-02 report files under `root`. An
/// unreadable root is an error; unreadable entries below it are logged
/// and skipped. Results are sorted by path for deterministic processing.
pub fn find_reports(root: &Path, file_glob: Option<&str>) -> Result<Vec<ReportFile>> {
    std::fs::metadata(root).with_context(|| format!("cannot read root directory {}", root.display()))?;
    let set = build_glob(file_glob)?;
    let mut out: Vec<ReportFile> = vec![];
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => { log::warn!("skipping unreadable entry: {e}"); continue }
        };
        if !entry.file_type().is_file() { continue; }
        let name = entry.file_name().to_string_lossy();
        if !report_extension(&name) { continue; }
        let Some(kind) = SeqKind::from_file_name(&name) else { continue };
        if let Some(set) = &set && !set.is_match(entry.path()) { continue; }
        out.push(ReportFile { path: entry.into_path(), kind });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn build_glob(file_glob: Option<&str>) -> Result<Option<GlobSet>> {
    let Some(g) = file_glob else { return Ok(None) };
    let glob = GlobBuilder::new(g)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid file glob {g:?}"))?;
    let mut gs = GlobSetBuilder::new();
    gs.add(glob);
    Ok(Some(gs.build()?))
}

/// Immediate subdirectories of the root, one per serial number. The
/// detailed-report generator consumes this same layout.
pub fn serial_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let rd = std::fs::read_dir(root).with_context(|| format!("cannot read root directory {}", root.display()))?;
    let mut dirs: Vec<PathBuf> = rd
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}
