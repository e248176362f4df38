use std::io::Read;
use std::path::Path;

use anyhow::Context;

use crate::models::RawActivityRow;

/// Read flat raw activity rows. The header must use the row's field names;
/// empty cells become missing values.
pub fn read_activity_rows<R: Read>(reader: R) -> anyhow::Result<Vec<RawActivityRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();

    for (index, result) in reader.deserialize::<RawActivityRow>().enumerate() {
        // +2: one for the header, one for 1-based numbering
        let row = result
            .with_context(|| format!("malformed activity row on line {}", index + 2))?;
        rows.push(row);
    }

    Ok(rows)
}

pub fn read_activity_csv(path: &Path) -> anyhow::Result<Vec<RawActivityRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    read_activity_rows(file)
}
