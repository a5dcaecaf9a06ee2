// 📄 CSV materializers - group list, member grid, relationship matrix
// All writers render into in-memory strings; callers decide the sink

use anyhow::Result;

use crate::affinity::AffinityMatrix;
use crate::db::{Rating, Student};
use crate::grouping::Partition;

/// `Group No.,Members` with names comma-joined, one row per group.
pub fn grouping_csv(partition: &Partition) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Group No.", "Members"])?;

    for (i, group) in partition.iter().filter(|g| !g.is_empty()).enumerate() {
        let members = group
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        writer.write_record([(i + 1).to_string(), members])?;
    }

    finish(writer)
}

/// `Group No.` plus one `Member N` column per slot, blank-padded to the
/// widest group.
pub fn grouping_grid_csv(partition: &Partition) -> Result<String> {
    let width = partition.iter().map(|g| g.len()).max().unwrap_or(0);

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec!["Group No.".to_string()];
    for slot in 1..=width {
        header.push(format!("Member {}", slot));
    }
    writer.write_record(&header)?;

    for (i, group) in partition.iter().filter(|g| !g.is_empty()).enumerate() {
        let mut row = vec![(i + 1).to_string()];
        for slot in 0..width {
            row.push(
                group
                    .get(slot)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }

    finish(writer)
}

/// Full pairwise affinity matrix with names on both axes and a zero
/// diagonal, ordered by student id.
pub fn relationship_matrix_csv(roster: &[Student], ratings: &[Rating]) -> Result<String> {
    let matrix = AffinityMatrix::build(roster, ratings);

    let mut sorted: Vec<&Student> = roster.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted.dedup_by(|a, b| a.id == b.id);

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![String::new()];
    header.extend(sorted.iter().map(|s| s.name.clone()));
    writer.write_record(&header)?;

    for (i, student) in sorted.iter().enumerate() {
        let mut row = vec![student.name.clone()];
        for j in 0..sorted.len() {
            row.push(matrix.affinity(i, j).to_string());
        }
        writer.write_record(&row)?;
    }

    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing csv writer failed: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}
