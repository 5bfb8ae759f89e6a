use std::sync::OnceLock;
use chrono::{NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::extract::sibling_value;
use crate::report::ReportDoc;

pub const UNKNOWN_DATE: &str = "date_inconnue";
pub const UNKNOWN_TIME: &str = "heure_inconnue";

/// Composite identity of one test run: serial number plus the report's
/// date (`DD/MM/YYYY`) and time (`HH:MM:SS`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub serial: String,
    pub date: String,
    pub time: String,
}

impl Identity {
    /// Canonical RecordKey, the merge key across report files.
    pub fn key(&self) -> String {
        format!("{} [{}][{}]", self.serial, self.date, self.time)
    }
}

/// Derive (serial, date, time) for one report. Serial precedence: header
/// `Serial Number:` field (the placeholder `NONE` is rejected), then a
/// label mentioning `série`, then the parent directory name. Date/time
/// come from the header when present, else from the file name, else the
/// sentinel strings.
pub fn resolve(doc: &ReportDoc, file_name: &str, parent_dir: &str) -> Identity {
    let serial = header_serial(doc)
        .or_else(|| sibling_value(doc, "série", &["value"]))
        .unwrap_or_else(|| {
            log::warn!("no serial number in {file_name}, using directory name {parent_dir}");
            parent_dir.to_string()
        });
    let header_date = sibling_value(doc, "Date:", &["hdr_value"]);
    let header_time = sibling_value(doc, "Time:", &["hdr_value"]);
    let (date, time) = match (header_date, header_time) {
        (Some(d), Some(t)) => normalize_date_time(&d, &t),
        _ => file_name_date_time(file_name),
    };
    Identity { serial, date, time }
}

fn header_serial(doc: &ReportDoc) -> Option<String> {
    let sn = sibling_value(doc, "Serial Number:", &["hdr_value"])?;
    if sn.eq_ignore_ascii_case("NONE") { None } else { Some(sn) }
}

/// Reports come out of the stand with US-formatted or spelled-out header
/// dates depending on the generator revision. Everything is renormalized
/// to `DD/MM/YYYY` / `HH:MM:SS`; unrecognized inputs pass through as-is.
pub fn normalize_date_time(date: &str, time: &str) -> (String, String) {
    let date = date.trim();
    let time = time.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%m/%d/%Y %I:%M:%S %p") {
        return (dt.format("%d/%m/%Y").to_string(), dt.format("%H:%M:%S").to_string());
    }
    let t = NaiveTime::parse_from_str(time, "%I:%M:%S %p")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| time.to_string());
    if let Some(d) = worded_date(date) {
        return (d, t);
    }
    static NUMERIC: OnceLock<Regex> = OnceLock::new();
    let re = NUMERIC.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap());
    if let Some(c) = re.captures(date) {
        return (format!("{:02}/{:02}/{}", c[1].parse::<u32>().unwrap_or(0), c[2].parse::<u32>().unwrap_or(0), &c[3]), t);
    }
    (date.to_string(), t)
}

/// `Monday, January 27, 2025` or `lundi 27 janvier 2025` → `27/01/2025`.
fn worded_date(date: &str) -> Option<String> {
    let lower = date.to_lowercase();
    let month = lower
        .split(|c: char| !c.is_alphabetic())
        .find_map(month_number)?;
    static PARTS: OnceLock<Regex> = OnceLock::new();
    let re = PARTS.get_or_init(|| Regex::new(r"\b(\d{1,2})\b.*?\b(\d{4})\b|\b(\d{4})\b.*?\b(\d{1,2})\b").unwrap());
    let c = re.captures(&lower)?;
    let (day, year) = match (c.get(1), c.get(2), c.get(3), c.get(4)) {
        (Some(d), Some(y), _, _) => (d.as_str(), y.as_str()),
        (_, _, Some(y), Some(d)) => (d.as_str(), y.as_str()),
        _ => return None,
    };
    let day: u32 = day.parse().ok()?;
    if !(1..=31).contains(&day) { return None; }
    Some(format!("{day:02}/{month:02}/{year}"))
}

fn month_number(word: &str) -> Option<u32> {
    let m = match word {
        "january" | "janvier" => 1,
        "february" | "fevrier" | "février" => 2,
        "march" | "mars" => 3,
        "april" | "avril" => 4,
        "may" | "mai" => 5,
        "june" | "juin" => 6,
        "july" | "juillet" => 7,
        "august" | "aout" | "août" => 8,
        "september" | "septembre" => 9,
        "october" | "octobre" => 10,
        "november" | "novembre" => 11,
        "december" | "decembre" | "décembre" => 12,
        _ => return None,
    };
    Some(m)
}

/// Timestamp embedded in the file name as `[HH MM SS][DD MM YYYY]`.
/// Unparseable names fall back to the sentinel strings rather than failing.
pub fn file_name_date_time(file_name: &str) -> (String, String) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\[(\d{1,2})\s+(\d{1,2})\s+(\d{1,2})\]\s*\[(\d{1,2})\s+(\d{1,2})\s+(\d{4})\]").unwrap()
    });
    if let Some(c) = re.captures(file_name) {
        let n = |i: usize| c[i].parse::<u32>().unwrap_or(0);
        return (
            format!("{:02}/{:02}/{}", n(4), n(5), &c[6]),
            format!("{:02}:{:02}:{:02}", n(1), n(2), n(3)),
        );
    }
    (UNKNOWN_DATE.to_string(), UNKNOWN_TIME.to_string())
}

/// Sort key for a RecordKey string. The serial is everything before the
/// first ` [`; keys whose bracketed groups do not parse get all-zero
/// date fields so they group at the front instead of failing. With
/// `tail4`, serials are reduced to their trailing 4 digits so units that
/// differ only by a prefix sort together.
pub fn sort_key(record_key: &str, tail4: bool) -> (String, i32, u32, u32, u32, u32, u32) {
    let (serial, rest) = match record_key.split_once(" [") {
        Some((s, r)) => (s.to_string(), r),
        None => return (record_key.to_string(), 0, 0, 0, 0, 0, 0),
    };
    let serial = if tail4 { tail4_serial(&serial) } else { serial };
    static DATE: OnceLock<Regex> = OnceLock::new();
    static TIME: OnceLock<Regex> = OnceLock::new();
    let date_re = DATE.get_or_init(|| Regex::new(r"(\d+)/(\d+)/(\d+)").unwrap());
    let time_re = TIME.get_or_init(|| Regex::new(r"(\d+):(\d+):(\d+)").unwrap());
    let Some(d) = date_re.captures(rest) else { return (serial, 0, 0, 0, 0, 0, 0) };
    let day = d[1].parse().unwrap_or(0);
    let month = d[2].parse().unwrap_or(0);
    let year = d[3].parse().unwrap_or(0);
    let Some(t) = time_re.captures(rest) else { return (serial, year, month, day, 0, 0, 0) };
    (
        serial,
        year,
        month,
        day,
        t[1].parse().unwrap_or(0),
        t[2].parse().unwrap_or(0),
        t[3].parse().unwrap_or(0),
    )
}

fn tail4_serial(serial: &str) -> String {
    let digits: String = serial.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { return serial.to_string(); }
    let tail: String = digits.chars().rev().collect();
    let start = tail.len().saturating_sub(4);
    format!("{:0>4}", &tail[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_sort_key() {
        let id = Identity { serial: "0042".into(), date: "27/01/2025".into(), time: "15:35:54".into() };
        assert_eq!(id.key(), "0042 [27/01/2025][15:35:54]");
        assert_eq!(sort_key(&id.key(), false), ("0042".to_string(), 2025, 1, 27, 15, 35, 54));
    }

    #[test]
    fn earlier_time_sorts_first() {
        let a = sort_key("0001 [01/01/2024][10:00:00]", false);
        let b = sort_key("0001 [01/01/2024][09:00:00]", false);
        assert!(b < a);
    }

    #[test]
    fn unparseable_keys_sort_before_valid_dates() {
        let bad = sort_key("0042 [date_inconnue][heure_inconnue]", false);
        let good = sort_key("0042 [01/01/2024][00:00:00]", false);
        assert_eq!(bad, ("0042".to_string(), 0, 0, 0, 0, 0, 0));
        assert!(bad < good);
    }

    #[test]
    fn tail4_groups_prefixed_serials() {
        assert_eq!(sort_key("LPVT-0042 [01/01/2024][10:00:00]", true).0, "0042");
        assert_eq!(sort_key("42 [01/01/2024][10:00:00]", true).0, "0042");
        assert_eq!(sort_key("no-digits [01/01/2024][10:00:00]", true).0, "no-digits");
    }

    #[test]
    fn file_name_timestamp_fallback() {
        let (d, t) = file_name_date_time("SEQ-01_LPVT_Report[15 35 54][27 01 2025].html");
        assert_eq!(d, "27/01/2025");
        assert_eq!(t, "15:35:54");
        let (d, t) = file_name_date_time("SEQ-01_weird_name.html");
        assert_eq!(d, UNKNOWN_DATE);
        assert_eq!(t, UNKNOWN_TIME);
    }

    #[test]
    fn us_header_date_renormalized() {
        let (d, t) = normalize_date_time("1/27/2025", "3:05:54 PM");
        assert_eq!(d, "27/01/2025");
        assert_eq!(t, "15:05:54");
    }

    #[test]
    fn worded_dates_translate_in_both_locales() {
        let (d, t) = normalize_date_time("Monday, January 27, 2025", "3:05:54 PM");
        assert_eq!(d, "27/01/2025");
        assert_eq!(t, "15:05:54");
        let (d, _) = normalize_date_time("lundi 27 janvier 2025", "09:12:00");
        assert_eq!(d, "27/01/2025");
    }

    #[test]
    fn already_french_dates_pass_through_padded() {
        // without an AM/PM marker the US parse is not attempted and the
        // numeric date keeps its day-first reading, zero-padded
        let (d, t) = normalize_date_time("5/3/2025", "08:00:00");
        assert_eq!(t, "08:00:00");
        assert_eq!(d, "05/03/2025");
    }

    #[test]
    fn serial_from_directory_when_header_missing() {
        let doc = crate::report::ReportDoc::parse("<html><body><table><tr><td class='hdr_name'>Serial Number:</td><td class='hdr_value'>NONE</td></tr></table></body></html>".to_string());
        let id = resolve(&doc, "SEQ-01_LPVT_Report[10 00 00][01 01 2024].html", "0077");
        assert_eq!(id.serial, "0077");
        assert_eq!(id.date, "01/01/2024");
        assert_eq!(id.time, "10:00:00");
    }
}
