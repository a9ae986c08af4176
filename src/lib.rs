pub mod census;
pub mod config;
pub mod episode;
pub mod export;
pub mod normalize;
mod span;
mod util;

pub use anyhow::{Context, Error};
use chrono::NaiveDate;
use itertools::Either;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io, iter,
    ops::Deref,
    path::Path,
    sync::Arc,
};

pub use crate::{
    census::{Census, CensusWindow, DailyCount},
    config::Config,
    episode::{Episode, EpisodeRow, Episodes, GroupConfig, GroupType},
    export::ExportRow,
    normalize::{NormalizeReport, Normalized, RejectReason, Rejection},
    span::DateSpan,
    util::header,
};
use crate::util::{lenient_date, optional_string};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = ArcStr;

/// Columns that must be present in an admissions extract before any row is read.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "Medical Record #",
    "Admit Date",
    "Discharge Date",
    "Patient Type",
    "Visit Type",
    "State",
];

#[derive(Debug, Clone, Deserialize)]
struct VisitRaw {
    #[serde(rename = "Medical Record #", deserialize_with = "optional_string")]
    patient_id: Option<ArcStr>,
    #[serde(rename = "Admit Date", deserialize_with = "lenient_date")]
    admit: Option<NaiveDate>,
    #[serde(rename = "Discharge Date", deserialize_with = "lenient_date")]
    discharge: Option<NaiveDate>,
    #[serde(rename = "Patient Type")]
    category: String,
    #[serde(rename = "Visit Type")]
    class: String,
    #[serde(rename = "State", deserialize_with = "optional_string")]
    region: Option<ArcStr>,
    #[serde(rename = "First Name", default, deserialize_with = "optional_string")]
    first_name: Option<ArcStr>,
    #[serde(rename = "Last Name", default, deserialize_with = "optional_string")]
    last_name: Option<ArcStr>,
    #[serde(rename = "Service", default, deserialize_with = "optional_string")]
    service: Option<ArcStr>,
    #[serde(rename = "Address 1", default, deserialize_with = "optional_string")]
    address_1: Option<ArcStr>,
    #[serde(rename = "Address 2", default, deserialize_with = "optional_string")]
    address_2: Option<ArcStr>,
    #[serde(rename = "City", default, deserialize_with = "optional_string")]
    city: Option<ArcStr>,
    #[serde(rename = "Email", default, deserialize_with = "optional_string")]
    email: Option<ArcStr>,
}

impl VisitRaw {
    fn into_record(self, line: u64) -> VisitRecord {
        VisitRecord {
            line,
            patient_id: self.patient_id,
            admit: self.admit,
            discharge: self.discharge,
            category: PatientCategory::parse(&self.category),
            class: VisitClass::parse(&self.class),
            region: self.region.unwrap_or_else(|| "".into()),
            details: Details {
                first_name: self.first_name,
                last_name: self.last_name,
                service: self.service,
                address_1: self.address_1,
                address_2: self.address_2,
                city: self.city,
                email: self.email,
            },
        }
    }
}

/// Display fields that are carried through to the export untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Details {
    pub first_name: Option<ArcStr>,
    pub last_name: Option<ArcStr>,
    pub service: Option<ArcStr>,
    pub address_1: Option<ArcStr>,
    pub address_2: Option<ArcStr>,
    pub city: Option<ArcStr>,
    pub email: Option<ArcStr>,
}

/// A row in the admissions extract, before normalization.
///
/// Dates that could not be parsed are `None`, the same as dates that were left blank.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitRecord {
    /// 1-based line in the source file, used when reporting problems with the row.
    pub line: u64,
    pub patient_id: Option<PatientId>,
    pub admit: Option<NaiveDate>,
    pub discharge: Option<NaiveDate>,
    pub category: PatientCategory,
    pub class: VisitClass,
    pub region: ArcStr,
    pub details: Details,
}

/// A visit that has passed normalization.
///
/// Both dates are present and `admit <= discharge`.
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub line: u64,
    pub patient_id: PatientId,
    pub admit: NaiveDate,
    pub discharge: NaiveDate,
    pub category: PatientCategory,
    pub class: VisitClass,
    pub region: ArcStr,
    pub details: Details,
}

impl Visit {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.admit, self.discharge)
    }
}

/// The parsed list of visits, with a pre-built index for the patient id.
#[derive(Debug, Clone)]
pub struct Visits {
    els: Arc<Vec<Visit>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Visits {
    pub fn new(els: Vec<Visit>) -> Self {
        let mut this = Visits {
            els: Arc::new(els),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_id_map();
        this
    }

    /// Visits for one patient, in source order.
    pub fn visits_for_patient<'a>(
        &'a self,
        patient_id: &str,
    ) -> impl Iterator<Item = &'a Visit> + Clone + 'a {
        let idxs = match self.id_idx.get(patient_id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| {
            self.els
                .get(*idx)
                .expect("inconsistent visit patient_id index")
        }))
    }

    pub fn patient_count(&self) -> usize {
        self.id_idx.len()
    }

    /// Split the table into one owned list of visits per patient, ordered by patient id.
    pub fn partition(&self) -> Vec<(PatientId, Vec<Visit>)> {
        self.id_idx
            .iter()
            .map(|(id, idxs)| {
                (
                    id.clone(),
                    idxs.iter().map(|idx| self.els[*idx].clone()).collect(),
                )
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Visit> + '_ {
        self.els.iter().cloned()
    }

    fn rebuild_id_map(&mut self) {
        self.id_idx.clear();
        for (idx, visit) in self.els.iter().enumerate() {
            self.id_idx
                .entry(visit.patient_id.clone())
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl Deref for Visits {
    type Target = [Visit];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl<'a> IntoIterator for &'a Visits {
    type IntoIter = <&'a [Visit] as IntoIterator>::IntoIter;
    type Item = &'a Visit;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl FromIterator<Visit> for Visits {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Visit>,
    {
        Self::new(iter.into_iter().collect())
    }
}

// Sub-types

/// What kind of patient the visit was recorded against.
///
/// Source data is free text, so anything we don't recognise is kept as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatientCategory {
    Inpatient,
    Outpatient,
    Telemedicine,
    HomeCare,
    Other(ArcStr),
}

impl PatientCategory {
    pub fn parse(input: &str) -> Self {
        use PatientCategory::*;
        let folded = input.trim().to_ascii_lowercase();
        match folded.as_str() {
            "inpatient" | "in patient" | "in-patient" | "ip" => Inpatient,
            "outpatient" | "out patient" | "out-patient" | "op" => Outpatient,
            "telemedicine" | "telehealth" | "virtual" => Telemedicine,
            "home care" | "homecare" | "home-care" | "home health" => HomeCare,
            _ => Other(input.into()),
        }
    }

    /// Categories whose stays may span several visit rows in the region of interest.
    pub fn is_inpatient_like(&self) -> bool {
        matches!(self, PatientCategory::Inpatient | PatientCategory::HomeCare)
    }
}

impl fmt::Display for PatientCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatientCategory::Inpatient => f.write_str("Inpatient"),
            PatientCategory::Outpatient => f.write_str("Outpatient"),
            PatientCategory::Telemedicine => f.write_str("Telemedicine"),
            PatientCategory::HomeCare => f.write_str("Home Care"),
            PatientCategory::Other(text) => f.write_str(text),
        }
    }
}

/// Visit class code. Only used to decide how a missing discharge date is filled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisitClass {
    /// `O`: outpatient-like, discharged the day they arrived.
    Outpatient,
    /// `I`: inpatient-like, may still be admitted.
    Inpatient,
    Other(ArcStr),
}

impl VisitClass {
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "O" | "o" => VisitClass::Outpatient,
            "I" | "i" => VisitClass::Inpatient,
            other => VisitClass::Other(other.into()),
        }
    }
}

impl fmt::Display for VisitClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VisitClass::Outpatient => f.write_str("O"),
            VisitClass::Inpatient => f.write_str("I"),
            VisitClass::Other(text) => f.write_str(text),
        }
    }
}

/// Load an admissions extract from a CSV file.
pub fn load_visits(path: impl AsRef<Path>) -> Result<Vec<VisitRecord>> {
    let path = path.as_ref();
    let file = fs::File::open(path)
        .with_context(|| format!("unable to open \"{}\"", path.display()))?;
    let records =
        read_visits(file).with_context(|| format!("while loading \"{}\"", path.display()))?;
    event!(
        Level::INFO,
        "loaded {} rows from \"{}\"",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// Read an admissions extract from any CSV source.
///
/// Fails before reading any rows if a required column is missing.
pub fn read_visits(reader: impl io::Read) -> Result<Vec<VisitRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    check_columns(&headers)?;

    let mut out = vec![];
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        let raw: VisitRaw = record
            .deserialize(Some(&headers))
            .with_context(|| format!("malformed row on line {}", line))?;
        out.push(raw.into_record(line));
    }
    Ok(out)
}

/// Load an admissions extract, normalize it and group it into episodes.
pub fn load_episodes(
    path: impl AsRef<Path>,
    config: &Config,
) -> Result<(NormalizeReport, Episodes)> {
    let records = load_visits(path)?;
    let Normalized { visits, report } = normalize::normalize(records, config);
    let episodes = episode::group_all(&visits, &config.group_config());
    Ok((report, episodes))
}

fn check_columns(headers: &csv::StringRecord) -> Result {
    let missing = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .copied()
        .collect::<Vec<_>>();
    ensure!(
        missing.is_empty(),
        "the CSV must contain these columns: {} (missing: {})",
        REQUIRED_COLUMNS.join(", "),
        missing.join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const HEADER: &str = "Medical Record #,Admit Date,Discharge Date,Patient Type,Visit Type,State,First Name,City\n";

    #[test]
    fn reads_rows() {
        let input = format!(
            "{}MRN1,2024-01-01,01/03/2024,Inpatient,I,pr,Ana,San Juan\nMRN2,not a date,,Telehealth,O,NY,,\n",
            HEADER
        );
        let records = read_visits(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.line, 2);
        assert_eq!(first.patient_id.as_deref(), Some("MRN1"));
        assert_eq!(first.admit, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(first.discharge, NaiveDate::from_ymd_opt(2024, 1, 3));
        assert_eq!(first.category, PatientCategory::Inpatient);
        assert_eq!(first.class, VisitClass::Inpatient);
        assert_eq!(&*first.region, "pr");
        assert_eq!(first.details.city.as_deref(), Some("San Juan"));
        assert_eq!(first.details.email, None);

        let second = &records[1];
        assert_eq!(second.admit, None);
        assert_eq!(second.discharge, None);
        assert_eq!(second.category, PatientCategory::Telemedicine);
        assert_eq!(second.details.first_name, None);
    }

    #[test]
    fn missing_columns_are_fatal() {
        let input = "Medical Record #,Admit Date,Discharge Date\nMRN1,2024-01-01,2024-01-02\n";
        let err = read_visits(input.as_bytes()).unwrap_err();
        assert!(err
            .to_string()
            .contains("missing: Patient Type, Visit Type, State"));
    }

    #[test]
    fn unknown_categories_pass_through() {
        assert_eq!(
            PatientCategory::parse("Observation"),
            PatientCategory::Other("Observation".into())
        );
        assert_eq!(PatientCategory::parse(" HOME CARE "), PatientCategory::HomeCare);
        assert_eq!(VisitClass::parse("X"), VisitClass::Other("X".into()));
    }

    #[test]
    fn patient_index() {
        let visit = |id: &str, day| Visit {
            line: 0,
            patient_id: id.into(),
            admit: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            discharge: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            category: PatientCategory::Inpatient,
            class: VisitClass::Inpatient,
            region: "NY".into(),
            details: Details::default(),
        };
        let visits = Visits::new(vec![visit("b", 1), visit("a", 2), visit("b", 3)]);
        assert_eq!(visits.patient_count(), 2);
        assert_eq!(visits.visits_for_patient("b").count(), 2);
        assert_eq!(visits.visits_for_patient("c").count(), 0);
        let parts = visits.partition();
        assert_eq!(&*parts[0].0, "a");
        assert_eq!(parts[1].1.len(), 2);
    }
}
