// 📂 Roster ingestion - CSV and XML loaders with row validation
// Malformed rows are rejected here; the grouping core never sees them

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::info;

use crate::db::Student;

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

/// Load a roster file, dispatching on the extension (`.csv` or `.xml`).
pub fn load_roster(path: &Path) -> Result<Vec<Student>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => load_roster_csv(path),
        Some("xml") => load_roster_xml(path),
        other => bail!(
            "unsupported roster format {:?} for {}",
            other,
            path.display()
        ),
    }
}

/// Load a roster from a CSV file with an `id,name` header.
pub fn load_roster_csv(path: &Path) -> Result<Vec<Student>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open roster CSV {}", path.display()))?;

    let mut students = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (line, result) in reader.deserialize().enumerate() {
        let row: RosterRow = result.with_context(|| format!("bad roster row {}", line + 2))?;
        push_validated(&mut students, &mut seen, row.id, row.name, line + 2)?;
    }

    info!(count = students.len(), path = %path.display(), "roster CSV loaded");
    Ok(students)
}

/// Load a roster from an XML file of
/// `<students><student id=".." name=".."/></students>` rows.
pub fn load_roster_xml(path: &Path) -> Result<Vec<Student>> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read roster XML {}", path.display()))?;

    let students = parse_roster_xml(&xml)?;
    info!(count = students.len(), path = %path.display(), "roster XML loaded");
    Ok(students)
}

/// Parse roster XML from a string.
pub fn parse_roster_xml(xml: &str) -> Result<Vec<Student>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut students = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut row = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(ref e)) | Ok(XmlEvent::Empty(ref e))
                if e.name().as_ref() == b"student" =>
            {
                row += 1;
                let mut id = String::new();
                let mut name = String::new();

                for attr in e.attributes() {
                    let attr = attr.context("invalid attribute in <student>")?;
                    match attr.key.as_ref() {
                        b"id" => id = attr.unescape_value()?.into_owned(),
                        b"name" => name = attr.unescape_value()?.into_owned(),
                        _ => {}
                    }
                }

                push_validated(&mut students, &mut seen, id, name, row)?;
            }
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(e) => bail!(
                "XML parse error at position {}: {}",
                reader.buffer_position(),
                e
            ),
        }
        buf.clear();
    }

    Ok(students)
}

/// Reject rows missing an id or name; repeated ids keep the first row.
fn push_validated(
    students: &mut Vec<Student>,
    seen: &mut HashSet<String>,
    id: String,
    name: String,
    row: usize,
) -> Result<()> {
    let id = id.trim().to_string();
    let name = name.trim().to_string();

    if id.is_empty() {
        bail!("roster row {} has no id", row);
    }
    if name.is_empty() {
        bail!("roster row {} ({}) has no name", row, id);
    }

    if seen.insert(id.clone()) {
        students.push(Student { id, name });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roster_xml() {
        let xml = r#"<students>
            <student id="s01" name="Alice"/>
            <student id="s02" name="Bob"></student>
        </students>"#;

        let students = parse_roster_xml(xml).unwrap();

        assert_eq!(students.len(), 2);
        assert_eq!(students[0].id, "s01");
        assert_eq!(students[0].name, "Alice");
        assert_eq!(students[1].id, "s02");
    }

    #[test]
    fn test_xml_duplicate_id_keeps_first() {
        let xml = r#"<students>
            <student id="s01" name="Alice"/>
            <student id="s01" name="Impostor"/>
        </students>"#;

        let students = parse_roster_xml(xml).unwrap();

        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Alice");
    }

    #[test]
    fn test_xml_missing_id_rejected() {
        let xml = r#"<students><student name="Nameless"/></students>"#;
        assert!(parse_roster_xml(xml).is_err());
    }

    #[test]
    fn test_xml_missing_name_rejected() {
        let xml = r#"<students><student id="s01"/></students>"#;
        assert!(parse_roster_xml(xml).is_err());
    }

    #[test]
    fn test_csv_roundtrip_through_tempfile() {
        let dir = std::env::temp_dir();
        let path = dir.join("peer_grouping_roster_test.csv");
        std::fs::write(&path, "id,name\ns01,Alice\ns02,Bob\ns01,Alice again\n").unwrap();

        let students = load_roster_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(students.len(), 2, "duplicate id dropped");
        assert_eq!(students[0].name, "Alice");
        assert_eq!(students[1].id, "s02");
    }

    #[test]
    fn test_csv_blank_name_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join("peer_grouping_roster_blank.csv");
        std::fs::write(&path, "id,name\ns01,\n").unwrap();

        let result = load_roster_csv(&path);
        std::fs::remove_file(&path).ok();

        assert!(result.is_err(), "blank name must be rejected");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(load_roster(Path::new("roster.pdf")).is_err());
    }
}
