//! Clean up raw admission rows before they are grouped.
//!
//! Three fixes are applied, in this order:
//!
//! 1. The region field is corrected for the region of interest, using the city of the row
//!    (see [`correct_region`]).
//! 2. Telemedicine rows are dropped. They are not stays and never take part in grouping.
//! 3. Missing discharge dates are filled from the visit class (see
//!    [`fill_missing_discharge`]).
//!
//! Whatever is still unusable after that (no patient id, no admit date, no discharge date,
//! admitted after discharge) is rejected. Rejections are returned and logged, never dropped
//! silently and never forced into an episode.
use crate::{
    config::Config, ArcStr, PatientCategory, PatientId, Visit, VisitClass, VisitRecord, Visits,
};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use qu::ick_use::*;
use serde::Serialize;
use std::{collections::BTreeMap, fmt};
use term_data_table as tdt;

/// The region whose rows get city-based corrections and inpatient-only merging.
pub const REGION_OF_INTEREST: &str = "PR";

/// Region code for cities outside the country.
pub const INTERNATIONAL: &str = "INTL";

/// Ways the region of interest gets spelled in the region field, after [`fold`].
const REGION_ALIASES: [&str; 3] = ["PR", "P R", "PUERTO RICO"];

/// Cities that get entered with a region of `PR` but are not in Puerto Rico.
///
/// Keys are folded with [`fold`]. Any city not listed here keeps the canonical `PR`.
static CITY_CORRECTIONS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        // abroad
        ("SANTO DOMINGO", INTERNATIONAL),
        ("PUNTA CANA", INTERNATIONAL),
        ("SANTIAGO DE LOS CABALLEROS", INTERNATIONAL),
        ("LA ROMANA", INTERNATIONAL),
        ("CARACAS", INTERNATIONAL),
        // US Virgin Islands
        ("ST THOMAS", "VI"),
        ("SAINT THOMAS", "VI"),
        ("CHARLOTTE AMALIE", "VI"),
        ("ST CROIX", "VI"),
        ("SAINT CROIX", "VI"),
        ("CHRISTIANSTED", "VI"),
        ("ST JOHN", "VI"),
        ("SAINT JOHN", "VI"),
    ])
});

/// Uppercase, drop `.` and `,`, and collapse whitespace: `"St. Thomas "` -> `"ST THOMAS"`.
fn fold(input: &str) -> String {
    input
        .chars()
        .filter(|ch| !matches!(ch, '.' | ','))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Does the region field name the region of interest, however it was spelled?
///
/// City correction and episode grouping both decide membership here.
pub fn is_region_of_interest(region: &str) -> bool {
    REGION_ALIASES.contains(&fold(region).as_str())
}

/// Correct the region of a row from its city.
///
/// Only rows whose region is the region of interest are touched: a city from the correction
/// table gives its mapped region, any other city (or none) gives the canonical `PR`. Every
/// other region is returned exactly as it was given.
pub fn correct_region<'a>(region: &'a str, city: Option<&str>) -> &'a str {
    if !is_region_of_interest(region) {
        return region;
    }
    city.and_then(|city| CITY_CORRECTIONS.get(fold(city).as_str()).copied())
        .unwrap_or(REGION_OF_INTEREST)
}

/// Fill in missing discharge dates, returning the number of rows changed.
///
/// - class `O`: discharged the day they were admitted.
/// - class `I`: `open_discharge`, i.e. still admitted.
/// - anything else stays empty, and the row will be rejected later.
///
/// Rows without an admit date are left alone.
pub fn fill_missing_discharge(records: &mut [VisitRecord], open_discharge: NaiveDate) -> usize {
    let mut filled = 0;
    for record in records.iter_mut() {
        if record.discharge.is_some() {
            continue;
        }
        let Some(admit) = record.admit else {
            continue;
        };
        record.discharge = match record.class {
            VisitClass::Outpatient => Some(admit),
            VisitClass::Inpatient => Some(open_discharge),
            VisitClass::Other(_) => None,
        };
        if record.discharge.is_some() {
            filled += 1;
        }
    }
    filled
}

/// Why a row could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    MissingPatientId,
    /// Missing or unparseable admit date. Nothing to anchor an episode to.
    MissingAdmit,
    /// Still no discharge date after filling, because the visit class gave no rule.
    MissingDischarge { class: String },
    AdmitAfterDischarge {
        admit: NaiveDate,
        discharge: NaiveDate,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RejectReason::MissingPatientId => f.write_str("missing patient id"),
            RejectReason::MissingAdmit => f.write_str("missing or unreadable admit date"),
            RejectReason::MissingDischarge { class } => write!(
                f,
                "missing discharge date, and visit class \"{}\" has no fill rule",
                class
            ),
            RejectReason::AdmitAfterDischarge { admit, discharge } => {
                write!(f, "admitted {} after discharge {}", admit, discharge)
            }
        }
    }
}

/// A row that was not turned into a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub line: u64,
    pub patient_id: Option<PatientId>,
    pub reason: RejectReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.patient_id {
            Some(id) => write!(f, "line {} (patient {}): {}", self.line, id, self.reason),
            None => write!(f, "line {}: {}", self.line, self.reason),
        }
    }
}

/// What the normalizer did to a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    pub rows_read: usize,
    pub regions_corrected: usize,
    pub telemedicine_excluded: usize,
    pub discharges_filled: usize,
    pub rejections: Vec<Rejection>,
}

impl NormalizeReport {
    pub fn rows_accepted(&self) -> usize {
        self.rows_read - self.telemedicine_excluded - self.rejections.len()
    }

    /// To display in the console/terminal.
    pub fn term_table(&self) -> tdt::Table<'static> {
        let mut table = tdt::Table::new().with_row(
            tdt::Row::new()
                .with_cell(tdt::Cell::from("Step"))
                .with_cell(tdt::Cell::from("Rows")),
        );
        for (label, count) in [
            ("rows read", self.rows_read),
            ("regions corrected", self.regions_corrected),
            ("telemedicine rows excluded", self.telemedicine_excluded),
            ("discharge dates filled", self.discharges_filled),
            ("rows rejected", self.rejections.len()),
            ("rows accepted", self.rows_accepted()),
        ] {
            table.add_row(
                tdt::Row::new()
                    .with_cell(tdt::Cell::from(label.to_string()))
                    .with_cell(tdt::Cell::from(count.to_string())),
            );
        }
        table
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone)]
pub struct Normalized {
    pub visits: Visits,
    pub report: NormalizeReport,
}

/// Run every normalization step over a loaded table.
pub fn normalize(mut records: Vec<VisitRecord>, config: &Config) -> Normalized {
    let mut report = NormalizeReport {
        rows_read: records.len(),
        ..NormalizeReport::default()
    };

    for record in records.iter_mut() {
        let corrected = correct_region(&record.region, record.details.city.as_deref());
        if corrected != &*record.region {
            let corrected: ArcStr = corrected.into();
            record.region = corrected;
            report.regions_corrected += 1;
        }
    }

    records.retain(|record| record.category != PatientCategory::Telemedicine);
    report.telemedicine_excluded = report.rows_read - records.len();

    report.discharges_filled = fill_missing_discharge(&mut records, config.open_discharge);

    let mut visits = Vec::with_capacity(records.len());
    for record in records {
        match into_visit(record) {
            Ok(visit) => visits.push(visit),
            Err(rejection) => {
                event!(Level::WARN, "rejected {}", rejection);
                report.rejections.push(rejection);
            }
        }
    }

    event!(
        Level::INFO,
        "normalized {} rows: {} accepted, {} telemedicine excluded, {} rejected",
        report.rows_read,
        visits.len(),
        report.telemedicine_excluded,
        report.rejections.len()
    );
    Normalized {
        visits: Visits::new(visits),
        report,
    }
}

fn into_visit(record: VisitRecord) -> Result<Visit, Rejection> {
    let reject = |reason| Rejection {
        line: record.line,
        patient_id: record.patient_id.clone(),
        reason,
    };
    let Some(patient_id) = record.patient_id.clone() else {
        return Err(reject(RejectReason::MissingPatientId));
    };
    let Some(admit) = record.admit else {
        return Err(reject(RejectReason::MissingAdmit));
    };
    let Some(discharge) = record.discharge else {
        return Err(reject(RejectReason::MissingDischarge {
            class: record.class.to_string(),
        }));
    };
    if admit > discharge {
        return Err(reject(RejectReason::AdmitAfterDischarge { admit, discharge }));
    }
    Ok(Visit {
        line: record.line,
        patient_id,
        admit,
        discharge,
        category: record.category,
        class: record.class,
        region: record.region,
        details: record.details,
    })
}
