use serde::{Deserialize, Serialize};

/// Which of the two test-stand sequences produced a report file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeqKind { Seq01, Seq02 }

impl SeqKind {
    pub fn prefix(self) -> &'static str {
        match self { SeqKind::Seq01 => "SEQ-01", SeqKind::Seq02 => "SEQ-02" }
    }

    pub fn from_file_name(name: &str) -> Option<SeqKind> {
        if name.starts_with("SEQ-01") { return Some(SeqKind::Seq01); }
        if name.starts_with("SEQ-02") { return Some(SeqKind::Seq02); }
        None
    }
}

impl std::fmt::Display for SeqKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Report section a field lives in. Sections without an end marker run to
/// the end of the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section { Vdc24, Vac115, Resistances, Transfer19Vdc, Transfer115Vac }

impl Section {
    pub fn start_marker(self) -> Option<&'static str> {
        match self {
            Section::Vdc24 => Some("Test des alimentations à 24VDC"),
            Section::Vac115 => Some("Test des alimentations à 115VAC"),
            Section::Resistances => None,
            Section::Transfer19Vdc => Some("Test 1.9Un sur 2 voies en 19VDC"),
            Section::Transfer115Vac => Some("Test 1.9Un sur 2 voies en 115VAC"),
        }
    }

    pub fn end_marker(self) -> Option<&'static str> {
        match self {
            Section::Vdc24 => Some("Test des alimentations à 115VAC"),
            Section::Vac115 => Some("Calcul des résistances"),
            _ => None,
        }
    }
}

/// How a field's payload is located once its section is in scope.
#[derive(Clone, Copy, Debug)]
pub enum Probe {
    /// Multimeter block: the labelled reading row, then the first `Data:`
    /// cell after it carries the measured value in a span.
    Meter { label: &'static str },
    /// Plain label cell whose sibling value cell holds a decimal number.
    Decimal { label: &'static str },
    /// Label cell whose sibling reads `Résistance à monter = NNN ohms`.
    MountedOhms { label: &'static str },
}

/// One extractable measurement or status value. The catalog below is fixed
/// domain knowledge, not user input.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: SeqKind,
    pub section: Section,
    pub id: &'static str,
    pub probe: Probe,
}

pub static CATALOG: &[FieldSpec] = &[
    // SEQ-01: alimentations 24VDC
    FieldSpec { name: "alim 24VDC +16V", kind: SeqKind::Seq01, section: Section::Vdc24,
        id: "24VDC_+16V", probe: Probe::Meter { label: "Lecture mesure +16V" } },
    FieldSpec { name: "alim 24VDC -16V", kind: SeqKind::Seq01, section: Section::Vdc24,
        id: "24VDC_-16V", probe: Probe::Meter { label: "Lecture mesure -16V" } },
    FieldSpec { name: "alim 24VDC +5V", kind: SeqKind::Seq01, section: Section::Vdc24,
        id: "24VDC_+5V", probe: Probe::Meter { label: "Lecture mesure +5V" } },
    FieldSpec { name: "alim 24VDC -5V", kind: SeqKind::Seq01, section: Section::Vdc24,
        id: "24VDC_-5V", probe: Probe::Meter { label: "Lecture mesure -5V" } },
    // SEQ-01: alimentations 115VAC
    FieldSpec { name: "alim 115VAC +16V", kind: SeqKind::Seq01, section: Section::Vac115,
        id: "115VAC_+16V", probe: Probe::Meter { label: "Lecture mesure +16V" } },
    FieldSpec { name: "alim 115VAC -16V", kind: SeqKind::Seq01, section: Section::Vac115,
        id: "115VAC_-16V", probe: Probe::Meter { label: "Lecture mesure -16V" } },
    // SEQ-01: calcul des résistances
    FieldSpec { name: "R46 calculée", kind: SeqKind::Seq01, section: Section::Resistances,
        id: "R46_calculee", probe: Probe::Decimal { label: "Résistance R46 calculée:" } },
    FieldSpec { name: "R46 à monter", kind: SeqKind::Seq01, section: Section::Resistances,
        id: "R46_monter", probe: Probe::MountedOhms { label: "Résistance R46 à monter:" } },
    FieldSpec { name: "R47 calculée", kind: SeqKind::Seq01, section: Section::Resistances,
        id: "R47_calculee", probe: Probe::Decimal { label: "Résistance R47 calculée:" } },
    FieldSpec { name: "R47 à monter", kind: SeqKind::Seq01, section: Section::Resistances,
        id: "R47_monter", probe: Probe::MountedOhms { label: "Résistance R47 à monter:" } },
    FieldSpec { name: "R48 calculée", kind: SeqKind::Seq01, section: Section::Resistances,
        id: "R48_calculee", probe: Probe::Decimal { label: "Résistance R48 calculée:" } },
    FieldSpec { name: "R48 à monter", kind: SeqKind::Seq01, section: Section::Resistances,
        id: "R48_monter", probe: Probe::MountedOhms { label: "Résistance R48 à monter:" } },
    // SEQ-02: rapport de transfert 1.9Un
    FieldSpec { name: "1.9Un en 19VDC", kind: SeqKind::Seq02, section: Section::Transfer19Vdc,
        id: "Test_19VDC", probe: Probe::Meter { label: "Lecture mesure -16V" } },
    FieldSpec { name: "1.9Un en 115VAC", kind: SeqKind::Seq02, section: Section::Transfer115Vac,
        id: "Test_115VAC", probe: Probe::Meter { label: "Lecture mesure -16V" } },
];

pub fn find(id_or_name: &str) -> Option<&'static FieldSpec> {
    CATALOG.iter().find(|s| s.id.eq_ignore_ascii_case(id_or_name) || s.name == id_or_name)
}

/// Acceptable range per column, used only for output highlighting.
pub fn bounds(name: &str) -> Option<(f64, f64)> {
    match name {
        "alim 24VDC +16V" | "alim 115VAC +16V" => Some((15.9, 16.3)),
        "alim 24VDC -16V" | "alim 115VAC -16V" => Some((-16.3, -15.9)),
        "alim 24VDC +5V" => Some((4.9, 5.1)),
        "alim 24VDC -5V" => Some((-5.1, -4.9)),
        "1.9Un en 19VDC" | "1.9Un en 115VAC" => Some((-16.3, -15.9)),
        _ => None,
    }
}

/// Paired column for the mounted-vs-calculated comparison.
pub fn calculated_pair(name: &str) -> Option<&'static str> {
    match name {
        "R46 à monter" => Some("R46 calculée"),
        "R47 à monter" => Some("R47 calculée"),
        "R48 à monter" => Some("R48 calculée"),
        _ => None,
    }
}

/// Derived column carrying the component marking for a mounted resistance.
pub fn marking_column(name: &str) -> Option<&'static str> {
    match name {
        "R46 à monter" => Some("R46 marquage"),
        "R47 à monter" => Some("R47 marquage"),
        "R48 à monter" => Some("R48 marquage"),
        _ => None,
    }
}

/// Marking code printed on the reel for the E96 values stocked at the test
/// stand. Unmapped values simply have no marking.
pub fn marking_code(ohms: u32) -> Option<&'static str> {
    match ohms {
        100 => Some("1000"),
        121 => Some("1210"),
        150 => Some("1500"),
        182 => Some("1820"),
        221 => Some("2210"),
        274 => Some("2740"),
        332 => Some("3320"),
        402 => Some("4020"),
        499 => Some("4990"),
        604 => Some("6040"),
        750 => Some("7500"),
        909 => Some("9090"),
        1000 => Some("1001"),
        1210 => Some("1211"),
        1500 => Some("1501"),
        1820 => Some("1821"),
        2210 => Some("2211"),
        2740 => Some("2741"),
        3320 => Some("3321"),
        4020 => Some("4021"),
        4990 => Some("4991"),
        6040 => Some("6041"),
        7500 => Some("7501"),
        9090 => Some("9091"),
        10000 => Some("1002"),
        12100 => Some("1212"),
        15000 => Some("1502"),
        22100 => Some("2212"),
        33200 => Some("3322"),
        49900 => Some("4992"),
        75000 => Some("7502"),
        100000 => Some("1003"),
        _ => None,
    }
}
