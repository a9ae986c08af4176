//! Who was in hospital when.
//!
//! All queries run over reduced episode rows, so a patient with several visit rows in one
//! stay is only seen once. Two different distinct-patient counts are offered for a trailing
//! window, and they answer different questions:
//!
//! - [`Census::daily_counts`]: for each day in the window, how many patients were in that
//!   day.
//! - [`Census::window_count`]: how many patients were in at any point during the window.
//!
//! The window count is not the sum, or the maximum, of the daily counts.
use crate::{DateSpan, EpisodeRow};
use chrono::NaiveDate;
use itertools::Itertools;
use qu::ick_use::*;
use serde::Serialize;
use term_data_table as tdt;

/// Is the episode ongoing on `date` (both ends inclusive)?
pub fn is_active_on(row: &EpisodeRow, date: NaiveDate) -> bool {
    row.span().contains(date)
}

/// Occupancy queries over a set of episode rows.
#[derive(Debug, Copy, Clone)]
pub struct Census<'a> {
    rows: &'a [EpisodeRow],
}

impl<'a> Census<'a> {
    pub fn new(rows: &'a [EpisodeRow]) -> Self {
        Census { rows }
    }

    /// Episodes with `episode_start <= date <= episode_end`.
    pub fn active_on(&self, date: NaiveDate) -> Vec<&'a EpisodeRow> {
        self.rows
            .iter()
            .filter(|row| is_active_on(row, date))
            .collect()
    }

    /// Episodes with `episode_start <= end` and `episode_end >= start`.
    pub fn overlapping(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<&'a EpisodeRow>> {
        ensure!(
            start <= end,
            "range start {} is after range end {}",
            start,
            end
        );
        Ok(self.overlapping_span(DateSpan::new(start, end)))
    }

    fn overlapping_span(&self, span: DateSpan) -> Vec<&'a EpisodeRow> {
        self.rows
            .iter()
            .filter(|row| row.span().overlaps(&span))
            .collect()
    }

    /// Distinct patients active on each day of the `window_days` days ending on `date`,
    /// oldest day first.
    pub fn daily_counts(&self, date: NaiveDate, window_days: u32) -> Vec<DailyCount> {
        let window = DateSpan::trailing(date, window_days);
        // only rows touching the window can be active on any day in it
        let candidates = self.overlapping_span(window);
        window
            .days()
            .map(|day| DailyCount {
                date: day,
                patients: distinct_patients(
                    candidates.iter().copied().filter(|row| is_active_on(row, day)),
                ),
            })
            .collect()
    }

    /// Distinct patients with an episode overlapping the `window_days` days ending on `date`.
    pub fn window_count(&self, date: NaiveDate, window_days: u32) -> usize {
        distinct_patients(
            self.overlapping_span(DateSpan::trailing(date, window_days))
                .into_iter(),
        )
    }

    /// Both counts for the same window.
    pub fn window(&self, date: NaiveDate, window_days: u32) -> CensusWindow {
        let span = DateSpan::trailing(date, window_days);
        let window = CensusWindow {
            start: span.start,
            end: span.end,
            daily: self.daily_counts(date, window_days),
            window_patients: self.window_count(date, window_days),
        };
        event!(
            Level::INFO,
            "{} distinct patients between {} and {}",
            window.window_patients,
            window.start,
            window.end
        );
        window
    }
}

fn distinct_patients<'a>(rows: impl Iterator<Item = &'a EpisodeRow>) -> usize {
    rows.map(EpisodeRow::patient_id).unique().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub patients: usize,
}

/// Daily and whole-window distinct patient counts for one trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CensusWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub daily: Vec<DailyCount>,
    pub window_patients: usize,
}

impl CensusWindow {
    /// To display in the console/terminal.
    pub fn term_table(&self) -> tdt::Table<'static> {
        let mut table = tdt::Table::new().with_row(
            tdt::Row::new()
                .with_cell(tdt::Cell::from("Date"))
                .with_cell(tdt::Cell::from("Patients")),
        );
        for count in self.daily.iter() {
            table.add_row(
                tdt::Row::new()
                    .with_cell(tdt::Cell::from(count.date.to_string()))
                    .with_cell(tdt::Cell::from(count.patients.to_string())),
            );
        }
        table.add_row(
            tdt::Row::new()
                .with_cell(tdt::Cell::from(format!("{} - {}", self.start, self.end)))
                .with_cell(tdt::Cell::from(self.window_patients.to_string())),
        );
        table
    }
}
