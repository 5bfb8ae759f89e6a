use std::sync::OnceLock;
use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::catalog::{FieldSpec, Probe, Section};
use crate::report::ReportDoc;

fn td_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("td").unwrap())
}

/// Flattened, whitespace-squished text of a cell and its descendants.
pub fn cell_text(el: ElementRef) -> String {
    let joined: String = el.text().collect();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_class(el: ElementRef, names: &[&str]) -> bool {
    if names.is_empty() { return true; }
    el.value().attr("class").map(|c| {
        c.split_whitespace().any(|k| names.iter().any(|n| k.eq_ignore_ascii_case(n)))
    }).unwrap_or(false)
}

/// Leaf table cells in document order. The reports nest tables inside
/// cells, so a non-leaf cell's text would swallow every marker below it.
fn leaf_cells(doc: &ReportDoc) -> Vec<(ElementRef<'_>, String)> {
    doc.dom
        .select(td_selector())
        .filter(|td| td.select(td_selector()).next().is_none())
        .map(|td| (td, cell_text(td)))
        .collect()
}

pub fn normalize_decimal(s: &str) -> String {
    s.trim().replace(',', ".")
}

/// Extract one field's value, or `None` when the section, label, or payload
/// is absent. Structural cell lookup first, textual windowing as fallback;
/// both treat every kind of absence as "no value", never an error.
pub fn extract(doc: &ReportDoc, spec: &FieldSpec) -> Option<String> {
    structural(doc, spec).or_else(|| windowed(&doc.raw, spec))
}

fn structural(doc: &ReportDoc, spec: &FieldSpec) -> Option<String> {
    let cells = leaf_cells(doc);
    let start = spec.section.start_marker();
    let end = spec.section.end_marker();
    let mut in_section = start.is_none();
    match spec.probe {
        Probe::Meter { label } => {
            let mut armed = false;
            let mut i = 0;
            while i < cells.len() {
                let text = &cells[i].1;
                if !in_section {
                    if text.contains(start?) { in_section = true; }
                    i += 1;
                    continue;
                }
                if let Some(e) = end && text.contains(e) { return None; }
                if !armed {
                    if text.contains(label) { armed = true; }
                } else if text == "Data:" || text.ends_with("Data:") {
                    let value = cells.get(i + 1).map(|(_, t)| normalize_decimal(t))?;
                    if value.is_empty() { return None; }
                    return Some(value);
                }
                i += 1;
            }
            None
        }
        Probe::Decimal { label } => {
            let raw = scoped_sibling(&cells, start, end, label)?;
            let re = regex(r"(\d+(?:[.,]\d+)?)");
            re.captures(&raw).map(|c| normalize_decimal(&c[1]))
        }
        Probe::MountedOhms { label } => {
            let raw = scoped_sibling(&cells, start, end, label)?;
            let re = regex(r"=\s*(\d+)\s*ohms");
            re.captures(&raw).map(|c| c[1].to_string())
        }
    }
}

/// Value cell following a label cell, within the section bounded by the
/// given markers.
fn scoped_sibling(cells: &[(ElementRef<'_>, String)], start: Option<&str>, end: Option<&str>, label: &str) -> Option<String> {
    let mut in_section = start.is_none();
    for (i, (_, text)) in cells.iter().enumerate() {
        if !in_section {
            if text.contains(start?) { in_section = true; }
            continue;
        }
        if let Some(e) = end && text.contains(e) { return None; }
        if text.contains(label) {
            let value = cells.get(i + 1).map(|(_, t)| t.trim().to_string())?;
            if value.is_empty() { return None; }
            return Some(value);
        }
    }
    None
}

/// Header-style label/value pair anywhere in the document, with an optional
/// class restriction on the value cell.
pub fn sibling_value(doc: &ReportDoc, needle: &str, value_classes: &[&str]) -> Option<String> {
    let cells = leaf_cells(doc);
    for (i, (_, text)) in cells.iter().enumerate() {
        if text.contains(needle) {
            if let Some((el, t)) = cells.get(i + 1)
                && has_class(*el, value_classes) {
                let t = t.trim();
                if !t.is_empty() { return Some(t.to_string()); }
            }
        }
    }
    None
}

fn windowed(raw: &str, spec: &FieldSpec) -> Option<String> {
    let hay = section_slice(raw, spec.section)?;
    match spec.probe {
        Probe::Meter { label } => {
            let pat = format!(r"(?is){}.*?Data:\s*</td>\s*<td[^>]*>.*?>([^<]+)</span>", regex::escape(label));
            Regex::new(&pat).ok()?.captures(hay).map(|c| normalize_decimal(&c[1]))
        }
        Probe::Decimal { label } => {
            let pat = format!(r"(?is){}\s*</td>\s*<td[^>]*>\s*(\d+(?:[.,]\d+)?)\s*</td>", regex::escape(label));
            Regex::new(&pat).ok()?.captures(hay).map(|c| normalize_decimal(&c[1]))
        }
        Probe::MountedOhms { label } => {
            let pat = format!(r"(?is){}\s*</td>\s*<td[^>]*>\s*.*?=\s*(\d+)\s*ohms", regex::escape(label));
            Regex::new(&pat).ok()?.captures(hay).map(|c| c[1].to_string())
        }
    }
}

/// Textual span between the first occurrence of the section's start marker
/// and the first occurrence of its end marker. No start marker hit means
/// the whole section is absent.
fn section_slice(raw: &str, section: Section) -> Option<&str> {
    let rest = match section.start_marker() {
        None => raw,
        Some(m) => {
            let i = raw.find(m)?;
            &raw[i + m.len()..]
        }
    };
    match section.end_marker() {
        None => Some(rest),
        Some(m) => rest.find(m).map(|j| &rest[..j]),
    }
}

/// Overall pass/fail verdict of the report, `Inconnu` when absent.
pub fn uut_status(doc: &ReportDoc) -> String {
    if let Some(v) = sibling_value(doc, "UUT Result:", &["hdr_value"]) {
        return v;
    }
    let re = regex(r#"(?is)UUT Result:.*?hdr_value.*?<span[^>]*>(Passed|Failed|Terminated)</span>"#);
    if let Some(c) = re.captures(&doc.raw) {
        return c[1].trim().to_string();
    }
    "Inconnu".to_string()
}

fn regex(pat: &'static str) -> Regex {
    Regex::new(pat).unwrap()
}
