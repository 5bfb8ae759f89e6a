use std::path::Path;
use encoding_rs::Encoding;
use scraper::Html;

/// One report, fully read: the decoded text plus its parsed DOM. The
/// vendor reports declare charset=iso-8859-1 and are not strict HTML, so
/// both representations are kept: structural extraction walks the DOM and
/// the textual fallback runs over the raw string.
pub struct ReportDoc {
    pub raw: String,
    pub dom: Html,
}

impl ReportDoc {
    pub fn parse(raw: String) -> ReportDoc {
        let dom = Html::parse_document(&raw);
        ReportDoc { raw, dom }
    }

    pub fn from_path(path: &Path, encoding: &'static Encoding) -> std::io::Result<ReportDoc> {
        Ok(ReportDoc::parse(read_report(path, encoding)?))
    }
}

/// Read a report file and decode it with the given encoding. The file
/// handle is scoped to this call; undecodable bytes become replacement
/// characters rather than errors.
pub fn read_report(path: &Path, encoding: &'static Encoding) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let (text, _, _) = encoding.decode(&bytes);
    Ok(text.into_owned())
}

pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn latin1_accents_decode() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.html");
        let mut f = std::fs::File::create(&p).unwrap();
        // "Résistance R46 calculée" in ISO-8859-1
        f.write_all(b"R\xe9sistance R46 calcul\xe9e").unwrap();
        drop(f);
        let enc = encoding_for_label("iso-8859-1").unwrap();
        let text = read_report(&p, enc).unwrap();
        assert_eq!(text, "Résistance R46 calculée");
    }

    #[test]
    fn unknown_label_is_none() {
        assert!(encoding_for_label("latin-99").is_none());
        assert!(encoding_for_label("iso-8859-1").is_some());
    }
}
