//! Collapse a patient's visits into care episodes.
//!
//! An episode is a run of visits where each admission starts no more than the gap threshold
//! after the *running* end of the episode so far (the latest discharge seen, not the
//! discharge of the previous row). Comparing against the running end means a short visit
//! nested inside a long one is always absorbed:
//!
//! ```text
//!   A |=============================|          Jan 1 - Jan 30
//!   B      |=====|                             Jan 5 - Jan 10
//!   C                                  |==|    Feb 15 - Feb 16 (gap 16 days from Jan 30)
//! ```
//!
//! With a threshold of 20 days all three are one episode. Checking C against B's discharge
//! instead would see a 36 day gap and wrongly split the episode.
//!
//! Which visits are merged depends on the region and patient category:
//!
//! - In the region of interest, only inpatient and home care visits are merged. Every other
//!   visit there is an episode of its own.
//! - Everywhere else, all visits are merged regardless of category.
//! - Telemedicine visits are never part of an episode.
//!
//! Each of these branches is merged separately.
use crate::{
    config::DEFAULT_GAP_THRESHOLD_DAYS, normalize::is_region_of_interest, DateSpan,
    PatientCategory, PatientId, Visit, Visits,
};
use chrono::{Duration, NaiveDate};
use itertools::Itertools;
use qu::ick_use::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref, sync::Arc};
use term_data_table as tdt;

/// Which grouping rule produced an episode.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum GroupType {
    /// Outside the region of interest: all visits merged.
    Merged,
    /// Inpatient or home care visits in the region of interest, merged.
    RegionInpatient,
    /// A region of interest visit that is never merged.
    Singleton,
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            GroupType::Merged => "merged",
            GroupType::RegionInpatient => "region inpatient",
            GroupType::Singleton => "singleton",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupConfig {
    /// A threshold of 0 or less turns merging off.
    pub gap_threshold_days: i64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            gap_threshold_days: DEFAULT_GAP_THRESHOLD_DAYS,
        }
    }
}

impl GroupConfig {
    /// The branch a visit is grouped under, or `None` if it takes no part in grouping.
    pub fn group_type(&self, visit: &Visit) -> Option<GroupType> {
        if visit.category == PatientCategory::Telemedicine {
            return None;
        }
        Some(match (
            is_region_of_interest(&visit.region),
            visit.category.is_inpatient_like(),
        ) {
            (false, _) => GroupType::Merged,
            (true, true) => GroupType::RegionInpatient,
            (true, false) => GroupType::Singleton,
        })
    }
}

/// One or more visits for a single patient that form a continuous stay.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    patient_id: PatientId,
    sequence: u32,
    group_type: GroupType,
    /// Never empty, sorted by admit date (stable).
    visits: Vec<Visit>,
    span: DateSpan,
}

impl Episode {
    /// `visits` must be non-empty, belong to one patient and be sorted by admit date.
    fn new(group_type: GroupType, visits: Vec<Visit>) -> Self {
        let first = visits.first().expect("episodes always have at least 1 visit");
        let span = DateSpan::new(
            first.admit,
            visits
                .iter()
                .map(|visit| visit.discharge)
                .max()
                .unwrap_or(first.discharge),
        );
        Episode {
            patient_id: first.patient_id.clone(),
            sequence: 0,
            group_type,
            visits,
            span,
        }
    }

    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    /// Position of this episode among the patient's episodes, ordered by start, from 1.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn group_type(&self) -> GroupType {
        self.group_type
    }

    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    pub fn len(&self) -> usize {
        self.visits.len()
    }

    /// Earliest admit.
    pub fn start(&self) -> NaiveDate {
        self.span.start
    }

    /// Latest discharge, which need not be the discharge of the last visit.
    pub fn end(&self) -> NaiveDate {
        self.span.end
    }

    pub fn span(&self) -> DateSpan {
        self.span
    }

    /// Collapse into a single row: the visit with the earliest admit (the first one on
    /// ties), carrying the span of the whole episode.
    pub fn reduce(&self) -> EpisodeRow {
        let representative = self
            .visits
            .iter()
            .min_by_key(|visit| visit.admit)
            .expect("episodes always have at least 1 visit");
        EpisodeRow {
            visit: representative.clone(),
            episode_start: self.span.start,
            episode_end: self.span.end,
            group_type: self.group_type,
            sequence: self.sequence,
            visit_count: self.visits.len(),
        }
    }
}

/// Split visits into merged runs.
///
/// Visits are sorted by admit date (stable, so ties keep their order). A visit joins the
/// current run when `admit <= running_end + gap_threshold_days`, where `running_end` is the
/// latest discharge in the run. With a threshold of 0 or less every visit is its own run.
pub fn merge_visits(mut visits: Vec<Visit>, gap_threshold_days: i64) -> Vec<Vec<Visit>> {
    visits.sort_by_key(|visit| visit.admit);

    let mut runs: Vec<Vec<Visit>> = Vec::new();
    let mut running_end = NaiveDate::MIN;
    for visit in visits {
        match runs.last_mut() {
            Some(run) if continues(running_end, visit.admit, gap_threshold_days) => {
                running_end = running_end.max(visit.discharge);
                run.push(visit);
            }
            _ => {
                running_end = visit.discharge;
                runs.push(vec![visit]);
            }
        }
    }
    runs
}

fn continues(running_end: NaiveDate, admit: NaiveDate, gap_threshold_days: i64) -> bool {
    if gap_threshold_days <= 0 {
        return false;
    }
    // no two dates are further apart than this, and `Duration::days` panics on huge values
    let widest = NaiveDate::MAX.signed_duration_since(NaiveDate::MIN).num_days();
    match running_end.checked_add_signed(Duration::days(gap_threshold_days.min(widest))) {
        Some(limit) => admit <= limit,
        // the running end is already at the end of time
        None => true,
    }
}

/// Group all of one patient's visits into episodes, numbered by start date.
pub fn group_patient(visits: Vec<Visit>, config: &GroupConfig) -> Vec<Episode> {
    let mut merged = vec![];
    let mut region_inpatient = vec![];
    let mut singletons = vec![];
    for visit in visits {
        match config.group_type(&visit) {
            Some(GroupType::Merged) => merged.push(visit),
            Some(GroupType::RegionInpatient) => region_inpatient.push(visit),
            Some(GroupType::Singleton) => singletons.push(visit),
            None => event!(
                Level::DEBUG,
                "skipping telemedicine visit on line {} for {}",
                visit.line,
                visit.patient_id
            ),
        }
    }

    let gap = config.gap_threshold_days;
    let mut episodes = merge_visits(merged, gap)
        .into_iter()
        .map(|run| Episode::new(GroupType::Merged, run))
        .chain(
            merge_visits(region_inpatient, gap)
                .into_iter()
                .map(|run| Episode::new(GroupType::RegionInpatient, run)),
        )
        .chain(
            singletons
                .into_iter()
                .map(|visit| Episode::new(GroupType::Singleton, vec![visit])),
        )
        .collect::<Vec<_>>();

    episodes.sort_by_key(|episode| (episode.start(), episode.group_type));
    for (idx, episode) in episodes.iter_mut().enumerate() {
        episode.sequence = idx as u32 + 1;
    }
    episodes
}

/// Partition the visits by patient, group each patient independently (in parallel), and
/// recombine in patient id order.
pub fn group_all(visits: &Visits, config: &GroupConfig) -> Episodes {
    let episodes: Vec<Episode> = visits
        .partition()
        .into_par_iter()
        .flat_map_iter(|(_, patient_visits)| group_patient(patient_visits, config))
        .collect();
    event!(
        Level::INFO,
        "grouped {} visits for {} patients into {} episodes (gap threshold {} days)",
        visits.len(),
        visits.patient_count(),
        episodes.len(),
        config.gap_threshold_days
    );
    Episodes::new(episodes)
}

/// Episodes for many patients, ordered by patient id then sequence.
#[derive(Debug, Clone)]
pub struct Episodes {
    els: Arc<Vec<Episode>>,
}

impl Episodes {
    pub fn new(els: Vec<Episode>) -> Self {
        Episodes { els: Arc::new(els) }
    }

    pub fn for_patient<'a>(&'a self, patient_id: &'a str) -> impl Iterator<Item = &'a Episode> {
        self.els
            .iter()
            .filter(move |episode| &*episode.patient_id == patient_id)
    }

    /// One row per (patient, episode).
    pub fn reduce(&self) -> Vec<EpisodeRow> {
        reduce(&self.els)
    }

    pub fn count_by_group_type(&self) -> Vec<(GroupType, usize)> {
        self.els
            .iter()
            .map(|episode| episode.group_type)
            .sorted()
            .dedup_with_count()
            .map(|(count, ty)| (ty, count))
            .collect()
    }
}

impl Deref for Episodes {
    type Target = [Episode];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

/// One row per (patient, episode), in the order given.
pub fn reduce(episodes: &[Episode]) -> Vec<EpisodeRow> {
    episodes.iter().map(Episode::reduce).collect()
}

/// The representative visit of an episode, with the span of the whole episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRow {
    pub visit: Visit,
    pub episode_start: NaiveDate,
    pub episode_end: NaiveDate,
    pub group_type: GroupType,
    pub sequence: u32,
    pub visit_count: usize,
}

impl EpisodeRow {
    pub fn patient_id(&self) -> &PatientId {
        &self.visit.patient_id
    }

    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.episode_start, self.episode_end)
    }

    /// The row as a single visit covering the whole episode, for re-grouping a reduced table.
    pub fn as_visit(&self) -> Visit {
        Visit {
            admit: self.episode_start,
            discharge: self.episode_end,
            ..self.visit.clone()
        }
    }
}

/// To display in the console/terminal.
pub fn term_table(rows: &[EpisodeRow]) -> tdt::Table<'static> {
    let mut table = tdt::Table::new().with_row(
        tdt::Row::new()
            .with_cell(tdt::Cell::from("Patient"))
            .with_cell(tdt::Cell::from("Episode"))
            .with_cell(tdt::Cell::from("Start"))
            .with_cell(tdt::Cell::from("End"))
            .with_cell(tdt::Cell::from("Visits"))
            .with_cell(tdt::Cell::from("Rule"))
            .with_cell(tdt::Cell::from("Category"))
            .with_cell(tdt::Cell::from("State")),
    );
    for row in rows {
        table.add_row(
            tdt::Row::new()
                .with_cell(tdt::Cell::from(row.patient_id().to_string()))
                .with_cell(tdt::Cell::from(row.sequence.to_string()))
                .with_cell(tdt::Cell::from(row.episode_start.to_string()))
                .with_cell(tdt::Cell::from(row.episode_end.to_string()))
                .with_cell(tdt::Cell::from(row.visit_count.to_string()))
                .with_cell(tdt::Cell::from(row.group_type.to_string()))
                .with_cell(tdt::Cell::from(row.visit.category.to_string()))
                .with_cell(tdt::Cell::from(row.visit.region.to_string())),
        );
    }
    table
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Details, VisitClass};

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn visit(id: &str, admit: NaiveDate, discharge: NaiveDate) -> Visit {
        Visit {
            line: 0,
            patient_id: id.into(),
            admit,
            discharge,
            category: PatientCategory::Inpatient,
            class: VisitClass::Inpatient,
            region: "NY".into(),
            details: Details::default(),
        }
    }

    fn with(mut visit: Visit, category: PatientCategory, region: &str) -> Visit {
        visit.category = category;
        visit.region = region.into();
        visit
    }

    fn spans(episodes: &[Episode]) -> Vec<(NaiveDate, NaiveDate)> {
        episodes.iter().map(|e| (e.start(), e.end())).collect()
    }

    #[test]
    fn three_visits_merge() {
        let visits = vec![
            visit("MRN1", d(1, 1), d(1, 3)),
            visit("MRN1", d(1, 20), d(1, 22)),
            visit("MRN1", d(1, 25), d(1, 26)),
        ];
        let episodes = group_patient(visits, &GroupConfig::default());
        assert_eq!(spans(&episodes), vec![(d(1, 1), d(1, 26))]);
        assert_eq!(episodes[0].len(), 3);
        assert_eq!(episodes[0].sequence(), 1);
    }

    #[test]
    fn gap_boundary_is_inclusive() {
        let config = GroupConfig::default();
        // exactly 20 days after discharge
        let joined = group_patient(
            vec![visit("a", d(1, 1), d(1, 1)), visit("a", d(1, 21), d(1, 22))],
            &config,
        );
        assert_eq!(joined.len(), 1);
        let split = group_patient(
            vec![visit("a", d(1, 1), d(1, 1)), visit("a", d(1, 22), d(1, 22))],
            &config,
        );
        assert_eq!(spans(&split), vec![(d(1, 1), d(1, 1)), (d(1, 22), d(1, 22))]);
        assert_eq!(split[1].sequence(), 2);
    }

    #[test]
    fn nested_visit_is_absorbed() {
        // B sits inside A; C is 16 days after A ends but 36 after B ends.
        let visits = vec![
            visit("a", d(1, 5), d(1, 10)),
            visit("a", d(2, 15), d(2, 16)),
            visit("a", d(1, 1), d(1, 30)),
        ];
        let episodes = group_patient(visits, &GroupConfig::default());
        assert_eq!(spans(&episodes), vec![(d(1, 1), d(2, 16))]);

        let nested = group_patient(
            vec![visit("a", d(1, 1), d(1, 30)), visit("a", d(1, 5), d(1, 10))],
            &GroupConfig::default(),
        );
        assert_eq!(spans(&nested), vec![(d(1, 1), d(1, 30))]);
    }

    #[test]
    fn non_positive_threshold_disables_merging() {
        for gap in [0, -5] {
            let config = GroupConfig {
                gap_threshold_days: gap,
            };
            let episodes = group_patient(
                vec![visit("a", d(1, 1), d(1, 10)), visit("a", d(1, 2), d(1, 3))],
                &config,
            );
            assert_eq!(episodes.len(), 2);
        }
    }

    #[test]
    fn region_outpatients_never_merge() {
        let visits = vec![
            with(visit("a", d(1, 1), d(1, 1)), PatientCategory::Outpatient, "PR"),
            with(visit("a", d(1, 2), d(1, 2)), PatientCategory::Outpatient, "PR"),
            with(visit("a", d(1, 2), d(1, 2)), PatientCategory::Other("ER".into()), "pr"),
        ];
        let episodes = group_patient(visits, &GroupConfig::default());
        assert_eq!(episodes.len(), 3);
        assert!(episodes
            .iter()
            .all(|e| e.group_type() == GroupType::Singleton && e.len() == 1));
        assert_eq!(
            episodes.iter().map(Episode::sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn region_inpatients_merge_separately() {
        let visits = vec![
            with(visit("a", d(1, 1), d(1, 5)), PatientCategory::Inpatient, "PR"),
            with(visit("a", d(1, 10), d(1, 12)), PatientCategory::HomeCare, "PR"),
            with(visit("a", d(1, 3), d(1, 3)), PatientCategory::Outpatient, "PR"),
            // outside the region, category doesn't matter
            with(visit("a", d(1, 2), d(1, 2)), PatientCategory::Outpatient, "NY"),
            with(visit("a", d(1, 8), d(1, 9)), PatientCategory::Outpatient, "NY"),
        ];
        let episodes = group_patient(visits, &GroupConfig::default());
        let summary = episodes
            .iter()
            .map(|e| (e.sequence(), e.group_type(), e.start(), e.end(), e.len()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (1, GroupType::RegionInpatient, d(1, 1), d(1, 12), 2),
                (2, GroupType::Merged, d(1, 2), d(1, 9), 2),
                (3, GroupType::Singleton, d(1, 3), d(1, 3), 1),
            ]
        );
    }

    #[test]
    fn telemedicine_is_dropped() {
        let visits = vec![
            visit("a", d(1, 1), d(1, 2)),
            with(visit("a", d(1, 3), d(1, 3)), PatientCategory::Telemedicine, "NY"),
        ];
        let episodes = group_patient(visits, &GroupConfig::default());
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].len(), 1);
    }

    #[test]
    fn every_visit_in_exactly_one_episode() {
        let visits = vec![
            visit("a", d(1, 1), d(1, 3)),
            visit("b", d(1, 1), d(3, 1)),
            with(visit("a", d(2, 1), d(2, 1)), PatientCategory::Outpatient, "PR"),
            visit("a", d(3, 1), d(3, 2)),
            visit("b", d(2, 1), d(2, 2)),
            visit("c", d(6, 1), d(6, 1)),
        ];
        let mut lines = visits.clone();
        for (idx, v) in lines.iter_mut().enumerate() {
            v.line = idx as u64 + 2;
        }
        let episodes = group_all(&Visits::new(lines), &GroupConfig::default());
        let mut seen = episodes
            .iter()
            .flat_map(|e| e.visits().iter().map(|v| v.line))
            .collect::<Vec<_>>();
        seen.sort();
        assert_eq!(seen, (2..2 + visits.len() as u64).collect::<Vec<_>>());
        // patient order, then sequence
        assert_eq!(
            episodes
                .iter()
                .map(|e| (e.patient_id().to_string(), e.sequence()))
                .collect::<Vec<_>>(),
            vec![
                ("a".to_string(), 1),
                ("a".to_string(), 2),
                ("a".to_string(), 3),
                ("b".to_string(), 1),
                ("c".to_string(), 1),
            ]
        );
    }

    #[test]
    fn larger_threshold_never_adds_episodes() {
        let visits = vec![
            visit("a", d(1, 1), d(1, 2)),
            visit("a", d(1, 6), d(1, 7)),
            visit("a", d(1, 20), d(1, 21)),
            visit("a", d(2, 25), d(2, 28)),
            visit("a", d(5, 1), d(5, 1)),
        ];
        let mut last = usize::MAX;
        for gap in [-1, 0, 1, 3, 4, 13, 20, 35, 63, 100] {
            let config = GroupConfig {
                gap_threshold_days: gap,
            };
            let count = group_patient(visits.clone(), &config).len();
            assert!(count <= last, "gap {} gave {} episodes", gap, count);
            last = count;
        }
        assert_eq!(last, 1);
    }

    #[test]
    fn regrouping_reduced_rows_is_stable() {
        let config = GroupConfig::default();
        let visits = Visits::new(vec![
            visit("a", d(1, 1), d(1, 30)),
            visit("a", d(1, 5), d(1, 10)),
            visit("a", d(3, 15), d(3, 16)),
            with(visit("b", d(1, 1), d(1, 1)), PatientCategory::Outpatient, "PR"),
            with(visit("b", d(1, 2), d(1, 2)), PatientCategory::Outpatient, "PR"),
            with(visit("b", d(1, 3), d(1, 9)), PatientCategory::Inpatient, "PR"),
        ]);
        let once = group_all(&visits, &config).reduce();
        let again = group_all(
            &once.iter().map(EpisodeRow::as_visit).collect::<Visits>(),
            &config,
        )
        .reduce();
        let key = |rows: &[EpisodeRow]| {
            rows.iter()
                .map(|r| (r.patient_id().clone(), r.episode_start, r.episode_end))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&once), key(&again));
    }

    #[test]
    fn reduce_keeps_earliest_admit() {
        let mut first = visit("a", d(1, 1), d(1, 2));
        first.details.first_name = Some("first".into());
        let mut tie = visit("a", d(1, 1), d(1, 20));
        tie.details.first_name = Some("tie".into());
        let episodes = group_patient(
            vec![visit("a", d(1, 10), d(1, 12)), first, tie],
            &GroupConfig::default(),
        );
        let rows = reduce(&episodes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].visit.details.first_name.as_deref(), Some("first"));
        assert_eq!(rows[0].visit.discharge, d(1, 2));
        assert_eq!(rows[0].episode_start, d(1, 1));
        assert_eq!(rows[0].episode_end, d(1, 20));
        assert_eq!(rows[0].visit_count, 3);
    }

    #[test]
    fn open_discharge_does_not_overflow() {
        let open = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        let episodes = group_patient(
            vec![visit("a", d(1, 1), open), visit("a", d(6, 1), d(6, 2))],
            &GroupConfig::default(),
        );
        assert_eq!(spans(&episodes), vec![(d(1, 1), open)]);
    }

    #[test]
    fn huge_threshold_merges_everything() {
        let visits = vec![
            visit("a", d(1, 1), d(1, 2)),
            visit(
                "a",
                NaiveDate::from_ymd_opt(2100, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2100, 6, 2).unwrap(),
            ),
        ];
        let config = GroupConfig {
            gap_threshold_days: i64::MAX,
        };
        assert_eq!(group_patient(visits.clone(), &config).len(), 1);
        let config = GroupConfig {
            gap_threshold_days: i64::MIN,
        };
        assert_eq!(group_patient(visits, &config).len(), 2);
    }

    #[test]
    fn region_spellings_share_one_rule() {
        let visits = vec![
            with(visit("a", d(1, 1), d(1, 1)), PatientCategory::Outpatient, "Puerto Rico"),
            with(visit("a", d(1, 2), d(1, 2)), PatientCategory::Outpatient, "p.r."),
            with(visit("a", d(1, 3), d(1, 4)), PatientCategory::HomeCare, " PR"),
        ];
        let types = group_patient(visits, &GroupConfig::default())
            .iter()
            .map(Episode::group_type)
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                GroupType::Singleton,
                GroupType::Singleton,
                GroupType::RegionInpatient
            ]
        );
    }

    #[test]
    fn no_visits_no_episodes() {
        assert!(group_patient(vec![], &GroupConfig::default()).is_empty());
        assert!(group_all(&Visits::new(vec![]), &GroupConfig::default()).is_empty());
    }

    #[test]
    fn group_type_counts() {
        let visits = Visits::new(vec![
            visit("a", d(1, 1), d(1, 2)),
            with(visit("b", d(1, 1), d(1, 1)), PatientCategory::Outpatient, "PR"),
            with(visit("b", d(1, 5), d(1, 5)), PatientCategory::Outpatient, "PR"),
        ]);
        let episodes = group_all(&visits, &GroupConfig::default());
        assert_eq!(
            episodes.count_by_group_type(),
            vec![(GroupType::Merged, 1), (GroupType::Singleton, 2)]
        );
        assert_eq!(episodes.for_patient("b").count(), 2);
    }
}
