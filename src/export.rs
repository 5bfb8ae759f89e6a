use std::path::Path;
use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook};

use crate::aggregate::{AggregateTable, COL_KEY};
use crate::catalog;

/// Cell-level verdict against the registered numeric bounds. Values are
/// kept as strings end to end; parsing happens only here, accepting either
/// decimal separator. Unparseable cells are never marked.
pub fn out_of_bounds(raw: &str, min: f64, max: f64) -> bool {
    match parse_cell(raw) {
        Some(v) => v < min || v > max,
        None => false,
    }
}

fn parse_cell(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse::<f64>().ok()
}

/// A mounted resistance larger than its calculated target gets flagged.
fn mount_exceeds_calc(record: &crate::aggregate::Record, mount_col: &str) -> bool {
    let Some(calc_col) = catalog::calculated_pair(mount_col) else { return false };
    let (Some(mount), Some(calc)) = (record.get(mount_col), record.get(calc_col)) else { return false };
    match (mount.trim().parse::<i64>(), parse_cell(calc)) {
        (Ok(m), Some(c)) => m as f64 > c,
        _ => false,
    }
}

fn flagged(record: &crate::aggregate::Record, col: &str) -> bool {
    if let Some((min, max)) = catalog::bounds(col)
        && let Some(v) = record.get(col)
        && out_of_bounds(v, min, max) {
        return true;
    }
    mount_exceeds_calc(record, col)
}

/// Write the aggregate table as one spreadsheet sheet. Rows follow
/// `keys`; the first column is the RecordKey. The workbook is built fully
/// in memory and saved to a temporary sibling that is renamed over the
/// target, so a locked or unwritable target never leaves a torn file.
pub fn write_xlsx(path: &Path, table: &AggregateTable, keys: &[String], columns: &[String]) -> Result<()> {
    let mut workbook = Workbook::new();
    let header_fmt = Format::new().set_bold();
    let alert_fmt = Format::new().set_font_color("#FF0000");
    let sheet = workbook.add_worksheet();
    sheet.set_name("Statistiques_SEQ01_02")?;

    sheet.write_string_with_format(0, 0, COL_KEY, &header_fmt)?;
    for (c, col) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, (c + 1) as u16, col, &header_fmt)?;
    }
    for (r, key) in keys.iter().enumerate() {
        let Some(record) = table.records.get(key) else { continue };
        let row = (r + 1) as u32;
        sheet.write_string(row, 0, key)?;
        for (c, col) in columns.iter().enumerate() {
            let Some(value) = record.get(col) else { continue };
            let cell = (c + 1) as u16;
            if flagged(record, col) {
                sheet.write_string_with_format(row, cell, value, &alert_fmt)?;
            } else {
                sheet.write_string(row, cell, value)?;
            }
        }
    }
    sheet.autofilter(0, 0, keys.len() as u32, columns.len() as u16)?;
    sheet.autofit();

    let tmp = path.with_extension("xlsx.tmp");
    workbook.save(&tmp).with_context(|| format!("cannot write {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(anyhow::Error::new(e).context(format!("cannot replace {}", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Record;

    #[test]
    fn bounds_marking_matches_spec_examples() {
        assert!(out_of_bounds("16.50", 15.9, 16.3));
        assert!(!out_of_bounds("16.00", 15.9, 16.3));
        assert!(out_of_bounds("16,50", 15.9, 16.3));
        assert!(!out_of_bounds("pas un nombre", 15.9, 16.3));
    }

    #[test]
    fn negative_rail_bounds() {
        assert!(!out_of_bounds("-16.0", -16.3, -15.9));
        assert!(out_of_bounds("-15.5", -16.3, -15.9));
        assert!(out_of_bounds("-16.5", -16.3, -15.9));
    }

    #[test]
    fn mounted_above_calculated_is_flagged() {
        let mut r = Record::new();
        r.insert("R46 calculée".into(), "1200.5".into());
        r.insert("R46 à monter".into(), "1210".into());
        assert!(flagged(&r, "R46 à monter"));
        r.insert("R46 à monter".into(), "1200".into());
        assert!(!flagged(&r, "R46 à monter"));
        // no calculated value, nothing to compare against
        r.remove("R46 calculée");
        assert!(!flagged(&r, "R46 à monter"));
    }

    #[test]
    fn out_of_bounds_cell_is_flagged_by_column() {
        let mut r = Record::new();
        r.insert("alim 24VDC +16V".into(), "16.50".into());
        assert!(flagged(&r, "alim 24VDC +16V"));
        r.insert("alim 24VDC +16V".into(), "16.00".into());
        assert!(!flagged(&r, "alim 24VDC +16V"));
    }

    #[test]
    fn xlsx_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stats.xlsx");
        let mut table = AggregateTable::default();
        let mut r = Record::new();
        r.insert("Type".into(), "SEQ-01".into());
        r.insert("alim 24VDC +16V".into(), "16.05".into());
        table.records.insert("0042 [01/01/2024][10:00:00]".into(), r);
        let keys = vec!["0042 [01/01/2024][10:00:00]".to_string()];
        let columns = vec!["Type".to_string(), "alim 24VDC +16V".to_string()];
        write_xlsx(&out, &table, &keys, &columns).unwrap();
        assert!(out.exists());
        assert!(!dir.path().join("stats.xlsx.tmp").exists());
    }
}
