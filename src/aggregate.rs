use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use anyhow::Result;
use clap::ValueEnum;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::catalog::{self, FieldSpec, Probe};
use crate::extract;
use crate::identity;
use crate::locate::{self, ReportFile};
use crate::report::ReportDoc;

pub const COL_KEY: &str = "Identifiant Unique";
pub const COL_SERIAL: &str = "Numéro de série";
pub const COL_DATE: &str = "Date";
pub const COL_TIME: &str = "Heure";
pub const COL_TYPE: &str = "Type";
pub const COL_STATUS: &str = "Statut";

/// What to do when two files share a RecordKey and both carry a value for
/// the same field. Either way the collision is logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ConflictPolicy {
    #[default]
    KeepLast,
    KeepFirst,
}

/// One merged test instance: field display-name → extracted value.
pub type Record = BTreeMap<String, String>;

/// All records of one aggregation run, keyed by RecordKey. Owned solely by
/// the aggregation loop while it runs; every key appears exactly once.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AggregateTable {
    pub records: HashMap<String, Record>,
}

impl AggregateTable {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Row order for export: chronological per serial number when asked,
    /// plain lexicographic otherwise.
    pub fn sorted_keys(&self, chronological: bool, tail4: bool) -> Vec<String> {
        let mut keys: Vec<String> = self.records.keys().cloned().collect();
        if chronological {
            keys.sort_by_key(|k| identity::sort_key(k, tail4));
        } else {
            keys.sort();
        }
        keys
    }

    /// Column set: fixed metadata first, then the selected fields in
    /// catalog order, keeping only columns that received at least one
    /// value. Marking columns ride directly after their source column.
    pub fn columns(&self, specs: &[&'static FieldSpec]) -> Vec<String> {
        let mut cols: Vec<String> = [COL_SERIAL, COL_DATE, COL_TIME, COL_TYPE, COL_STATUS]
            .iter().map(|s| s.to_string()).collect();
        for spec in specs {
            if self.records.values().any(|r| r.contains_key(spec.name)) {
                cols.push(spec.name.to_string());
            }
            if let Some(mark) = catalog::marking_column(spec.name)
                && self.records.values().any(|r| r.contains_key(mark)) {
                cols.push(mark.to_string());
            }
        }
        cols
    }
}

/// Fold report files into the aggregate, one file at a time. A file that
/// cannot be read or decoded is logged and skipped; it never aborts the
/// batch. Running this twice over the same inputs yields the same table.
pub fn aggregate(
    files: &[ReportFile],
    specs: &[&'static FieldSpec],
    conflict: ConflictPolicy,
    encoding: &'static Encoding,
    mut progress: Option<&mut dyn FnMut(usize, &Path)>,
) -> AggregateTable {
    let mut table = AggregateTable::default();
    for (i, file) in files.iter().enumerate() {
        if let Some(cb) = progress.as_deref_mut() { cb(i, &file.path); }
        let doc = match ReportDoc::from_path(&file.path, encoding) {
            Ok(d) => d,
            Err(e) => { log::error!("cannot read {}: {e}", file.path.display()); continue }
        };
        fold_file(&mut table, file, &doc, specs, conflict);
    }
    table
}

fn fold_file(table: &mut AggregateTable, file: &ReportFile, doc: &ReportDoc, specs: &[&'static FieldSpec], conflict: ConflictPolicy) {
    let file_name = file.path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let parent = file.path.parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = identity::resolve(doc, &file_name, &parent);
    let key = id.key();
    let record = table.records.entry(key.clone()).or_insert_with(|| {
        let mut r = Record::new();
        r.insert(COL_SERIAL.into(), id.serial.clone());
        r.insert(COL_DATE.into(), id.date.clone());
        r.insert(COL_TIME.into(), id.time.clone());
        r.insert(COL_TYPE.into(), file.kind.to_string());
        r.insert(COL_STATUS.into(), extract::uut_status(doc));
        r
    });
    for spec in specs {
        if spec.kind != file.kind { continue; }
        let Some(value) = extract::extract(doc, spec) else { continue };
        let old = record.get(spec.name).cloned();
        let kept = match old {
            Some(old) if old != value => match conflict {
                ConflictPolicy::KeepLast => {
                    log::warn!("{key}: field {:?} overwritten by {file_name} ({old:?} -> {value:?})", spec.name);
                    record.insert(spec.name.to_string(), value.clone());
                    value
                }
                ConflictPolicy::KeepFirst => {
                    log::warn!("{key}: field {:?} from {file_name} ignored, keeping {old:?}", spec.name);
                    old
                }
            },
            _ => {
                record.insert(spec.name.to_string(), value.clone());
                value
            }
        };
        if matches!(spec.probe, Probe::MountedOhms { .. })
            && let Some(col) = catalog::marking_column(spec.name)
            && let Some(code) = kept.parse::<u32>().ok().and_then(catalog::marking_code) {
            record.insert(col.to_string(), code.to_string());
        }
    }
}

/// The whole pipeline minus the export: locate, extract, aggregate.
pub fn run(
    root: &Path,
    specs: &[&'static FieldSpec],
    file_glob: Option<&str>,
    conflict: ConflictPolicy,
    encoding: &'static Encoding,
    progress: Option<&mut dyn FnMut(usize, &Path)>,
) -> Result<AggregateTable> {
    let files = locate::find_reports(root, file_glob)?;
    log::info!("{} report files under {}", files.len(), root.display());
    Ok(aggregate(&files, specs, conflict, encoding, progress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CATALOG;
    use std::path::PathBuf;

    fn latin1() -> &'static Encoding {
        crate::report::encoding_for_label("iso-8859-1").unwrap()
    }

    fn all_specs() -> Vec<&'static FieldSpec> {
        CATALOG.iter().collect()
    }

    fn seq01_html(serial: &str, plus16: &str) -> String {
        format!(
            "<html><body><table>\
             <tr><td class='hdr_name'>Serial Number:</td><td class='hdr_value'>{serial}</td></tr>\
             <tr><td class='hdr_name'>UUT Result:</td><td class='hdr_value'><span>Passed</span></td></tr>\
             </table><table>\
             <tr><td colspan='2'>Test des alimentations à 24VDC</td></tr>\
             <tr><td colspan='2'>Lecture mesure +16V AG34461A</td></tr>\
             <tr><td class='label'>Data:</td><td class='value'><span>{plus16}</span></td></tr>\
             <tr><td colspan='2'>Test des alimentations à 115VAC</td></tr>\
             <tr><td colspan='2'>Calcul des résistances</td></tr>\
             <tr><td class='label'>Résistance R46 à monter:</td><td class='value'>Résistance à monter = 1210 ohms</td></tr>\
             </table></body></html>"
        )
    }

    fn seq02_html(serial: &str) -> String {
        format!(
            "<html><body><table>\
             <tr><td class='hdr_name'>Serial Number:</td><td class='hdr_value'>{serial}</td></tr>\
             <tr><td class='hdr_name'>UUT Result:</td><td class='hdr_value'><span>Failed</span></td></tr>\
             </table><table>\
             <tr><td colspan='2'>Test 1.9Un sur 2 voies en 19VDC</td></tr>\
             <tr><td colspan='2'>Lecture mesure -16V AG34461A</td></tr>\
             <tr><td class='label'>Data:</td><td class='value'><span>-16,1</span></td></tr>\
             </table></body></html>"
        )
    }

    fn write_reports(files: &[(&str, String)]) -> (tempfile::TempDir, Vec<ReportFile>) {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("0042");
        std::fs::create_dir(&unit).unwrap();
        let mut out = vec![];
        for (name, html) in files {
            let p = unit.join(name);
            std::fs::write(&p, html.as_bytes()).unwrap();
            out.push(ReportFile { path: p, kind: crate::catalog::SeqKind::from_file_name(name).unwrap() });
        }
        (dir, out)
    }

    #[test]
    fn two_sequence_files_make_two_records_with_scoped_fields() {
        let (_dir, files) = write_reports(&[
            ("SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", seq01_html("0042", "16.05")),
            ("SEQ-02_LPVT_Report[10 05 00][01 01 2024].html", seq02_html("0042")),
        ]);
        let specs = all_specs();
        let table = aggregate(&files, &specs, ConflictPolicy::KeepLast, latin1(), None);
        assert_eq!(table.records.len(), 2);
        let r1 = &table.records["0042 [01/01/2024][10:00:00]"];
        let r2 = &table.records["0042 [01/01/2024][10:05:00]"];
        assert_eq!(r1[COL_TYPE], "SEQ-01");
        assert_eq!(r1["alim 24VDC +16V"], "16.05");
        assert!(!r1.contains_key("1.9Un en 19VDC"));
        assert_eq!(r2[COL_TYPE], "SEQ-02");
        assert_eq!(r2["1.9Un en 19VDC"], "-16.1");
        assert!(!r2.contains_key("alim 24VDC +16V"));
    }

    #[test]
    fn same_key_files_merge_disjoint_fields_into_one_record() {
        let (_dir, files) = write_reports(&[
            ("SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", seq01_html("0042", "16.05")),
            ("SEQ-02_LPVT_Report[10 00 00][01 01 2024].html", seq02_html("0042")),
        ]);
        let specs = all_specs();
        let table = aggregate(&files, &specs, ConflictPolicy::KeepLast, latin1(), None);
        assert_eq!(table.records.len(), 1);
        let r = &table.records["0042 [01/01/2024][10:00:00]"];
        assert_eq!(r["alim 24VDC +16V"], "16.05");
        assert_eq!(r["1.9Un en 19VDC"], "-16.1");
        // metadata seeded by the first file processed
        assert_eq!(r[COL_TYPE], "SEQ-01");
        assert_eq!(r[COL_STATUS], "Passed");
    }

    #[test]
    fn aggregation_is_idempotent() {
        let (_dir, files) = write_reports(&[
            ("SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", seq01_html("0042", "16.05")),
            ("SEQ-02_LPVT_Report[10 05 00][01 01 2024].html", seq02_html("0042")),
        ]);
        let specs = all_specs();
        let a = aggregate(&files, &specs, ConflictPolicy::KeepLast, latin1(), None);
        let b = aggregate(&files, &specs, ConflictPolicy::KeepLast, latin1(), None);
        assert_eq!(a.records.len(), b.records.len());
        for (k, r) in &a.records {
            assert_eq!(Some(r), b.records.get(k));
        }
    }

    #[test]
    fn conflict_policies_keep_first_or_last() {
        let f1 = ("SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", seq01_html("0042", "16.01"));
        let f2 = ("SEQ-01_LPVT_ReportBis[10 00 00][01 01 2024].html", seq01_html("0042", "16.09"));
        let (_dir, files) = write_reports(&[f1.clone(), f2.clone()]);
        let specs = all_specs();
        let last = aggregate(&files, &specs, ConflictPolicy::KeepLast, latin1(), None);
        assert_eq!(last.records["0042 [01/01/2024][10:00:00]"]["alim 24VDC +16V"], "16.09");
        let first = aggregate(&files, &specs, ConflictPolicy::KeepFirst, latin1(), None);
        assert_eq!(first.records["0042 [01/01/2024][10:00:00]"]["alim 24VDC +16V"], "16.01");
    }

    #[test]
    fn unreadable_file_is_skipped_not_fatal() {
        let (_dir, mut files) = write_reports(&[
            ("SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", seq01_html("0042", "16.05")),
        ]);
        files.push(ReportFile { path: PathBuf::from("/no/such/file.html"), kind: crate::catalog::SeqKind::Seq01 });
        let specs = all_specs();
        let table = aggregate(&files, &specs, ConflictPolicy::KeepLast, latin1(), None);
        assert_eq!(table.records.len(), 1);
    }

    #[test]
    fn marking_column_derived_from_mounted_ohms() {
        let (_dir, files) = write_reports(&[
            ("SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", seq01_html("0042", "16.05")),
        ]);
        let specs = all_specs();
        let table = aggregate(&files, &specs, ConflictPolicy::KeepLast, latin1(), None);
        let r = &table.records["0042 [01/01/2024][10:00:00]"];
        assert_eq!(r["R46 à monter"], "1210");
        assert_eq!(r["R46 marquage"], "1211");
        let cols = table.columns(&specs);
        let monter = cols.iter().position(|c| c == "R46 à monter").unwrap();
        assert_eq!(cols[monter + 1], "R46 marquage");
        assert!(!cols.contains(&"R47 calculée".to_string()));
    }

    #[test]
    fn run_locates_and_aggregates_end_to_end() {
        let (dir, _) = write_reports(&[
            ("SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", seq01_html("0042", "16.05")),
            ("SEQ-02_LPVT_Report[10 05 00][01 01 2024].html", seq02_html("0042")),
        ]);
        let specs = all_specs();
        let table = run(dir.path(), &specs, None, ConflictPolicy::KeepLast, latin1(), None).unwrap();
        assert_eq!(table.records.len(), 2);
        let keys = table.sorted_keys(true, false);
        assert_eq!(keys[0], "0042 [01/01/2024][10:00:00]");
        assert_eq!(keys[1], "0042 [01/01/2024][10:05:00]");
        assert!(run(Path::new("/no/such/root"), &specs, None, ConflictPolicy::KeepLast, latin1(), None).is_err());
    }

    #[test]
    fn sorted_keys_are_chronological_per_serial() {
        let mut table = AggregateTable::default();
        for k in ["0001 [01/01/2024][10:00:00]", "0001 [01/01/2024][09:00:00]", "0001 [31/12/2023][23:59:59]"] {
            table.records.insert(k.to_string(), Record::new());
        }
        let keys = table.sorted_keys(true, false);
        assert_eq!(keys, vec![
            "0001 [31/12/2023][23:59:59]".to_string(),
            "0001 [01/01/2024][09:00:00]".to_string(),
            "0001 [01/01/2024][10:00:00]".to_string(),
        ]);
    }
}
