//! The result set handed back to users: one row per patient, fixed columns.
use crate::{util, ArcStr, EpisodeRow, PatientId};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    fs, io,
    path::Path,
};
use term_data_table as tdt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(rename = "Medical Record #")]
    pub patient_id: PatientId,
    #[serde(rename = "First Name")]
    pub first_name: Option<ArcStr>,
    #[serde(rename = "Last Name")]
    pub last_name: Option<ArcStr>,
    #[serde(rename = "Service")]
    pub service: Option<ArcStr>,
    #[serde(rename = "Address 1")]
    pub address_1: Option<ArcStr>,
    #[serde(rename = "Address 2")]
    pub address_2: Option<ArcStr>,
    #[serde(rename = "City")]
    pub city: Option<ArcStr>,
    #[serde(rename = "State")]
    pub region: ArcStr,
    #[serde(rename = "Email")]
    pub email: Option<ArcStr>,
}

impl ExportRow {
    pub const HEADERS: [&'static str; 9] = [
        "Medical Record #",
        "First Name",
        "Last Name",
        "Service",
        "Address 1",
        "Address 2",
        "City",
        "State",
        "Email",
    ];
}

impl From<&EpisodeRow> for ExportRow {
    fn from(row: &EpisodeRow) -> Self {
        let visit = &row.visit;
        let details = &visit.details;
        ExportRow {
            patient_id: visit.patient_id.clone(),
            first_name: details.first_name.clone(),
            last_name: details.last_name.clone(),
            service: details.service.clone(),
            address_1: details.address_1.clone(),
            address_2: details.address_2.clone(),
            city: details.city.clone(),
            region: visit.region.clone(),
            email: details.email.clone(),
        }
    }
}

/// Keep one row per patient (the earliest episode start, or the first row seen if starts
/// are equal) and project to the export columns. Output is ordered by patient id.
pub fn select_patients<'a>(rows: impl IntoIterator<Item = &'a EpisodeRow>) -> Vec<ExportRow> {
    let mut by_patient: BTreeMap<&PatientId, &EpisodeRow> = BTreeMap::new();
    for row in rows {
        match by_patient.entry(row.patient_id()) {
            Entry::Vacant(entry) => {
                entry.insert(row);
            }
            Entry::Occupied(mut entry) => {
                if row.episode_start < entry.get().episode_start {
                    entry.insert(row);
                }
            }
        }
    }
    by_patient.into_values().map(ExportRow::from).collect()
}

/// Write the rows as CSV. The header is written even when there are no rows.
pub fn write_csv(rows: &[ExportRow], writer: impl io::Write) -> Result {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    out.write_record(ExportRow::HEADERS)?;
    for row in rows {
        out.serialize(row)?;
    }
    out.flush()?;
    Ok(())
}

/// Save the rows to a CSV file.
pub fn save_csv(rows: &[ExportRow], path: impl AsRef<Path>, overwrite: bool) -> Result {
    fn inner(rows: &[ExportRow], path: &Path, overwrite: bool) -> Result {
        if util::path_exists(path)? {
            ensure!(overwrite, "file already exists");
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        write_csv(rows, io::BufWriter::new(fs::File::create(path)?))
    }
    let path = path.as_ref();
    inner(rows, path, overwrite)
        .with_context(|| format!("unable to save export to \"{}\"", path.display()))?;
    event!(
        Level::INFO,
        "wrote {} patients to \"{}\"",
        rows.len(),
        path.display()
    );
    Ok(())
}

/// To display in the console/terminal.
pub fn term_table(rows: &[ExportRow]) -> tdt::Table<'static> {
    fn opt(v: &Option<ArcStr>) -> tdt::Cell<'static> {
        tdt::Cell::from(v.as_deref().unwrap_or("").to_string())
    }
    let mut table = tdt::Table::new().with_row(
        ExportRow::HEADERS
            .into_iter()
            .fold(tdt::Row::new(), |row, label| {
                row.with_cell(tdt::Cell::from(label))
            }),
    );
    for row in rows {
        table.add_row(
            tdt::Row::new()
                .with_cell(tdt::Cell::from(row.patient_id.to_string()))
                .with_cell(opt(&row.first_name))
                .with_cell(opt(&row.last_name))
                .with_cell(opt(&row.service))
                .with_cell(opt(&row.address_1))
                .with_cell(opt(&row.address_2))
                .with_cell(opt(&row.city))
                .with_cell(tdt::Cell::from(row.region.to_string()))
                .with_cell(opt(&row.email)),
        );
    }
    table
}
