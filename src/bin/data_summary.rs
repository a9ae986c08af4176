use clap::Parser;
use inpatient_census::{
    episode::{self, group_all},
    header, load_visits,
    normalize::normalize,
    Config,
};
use qu::ick_use::*;
use std::path::PathBuf;
use term_data_table::{Cell, Row, Table};

#[derive(Debug, Parser)]
struct Opt {
    /// The admissions extract (CSV).
    input: PathBuf,
    #[clap(long, short)]
    config: Option<PathBuf>,
    #[clap(long)]
    gap_threshold: Option<i64>,
    /// How many episodes to show.
    #[clap(long, short, default_value_t = 10)]
    preview: usize,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let mut config = Config::load_or_default(opt.config.as_deref())?;
    if let Some(gap) = opt.gap_threshold {
        config.gap_threshold_days = gap;
    }
    let records = load_visits(&opt.input)?;
    let normalized = normalize(records, &config);
    let visits = normalized.visits;
    let report = normalized.report;

    header("Data stats");
    println!("total patients: {}", visits.patient_count());
    println!("total visits: {}", visits.len());
    if let Some(date) = visits.iter().map(|visit| visit.admit).min() {
        println!("earliest admission: {}", date);
    }
    if let Some(date) = visits.iter().map(|visit| visit.admit).max() {
        println!("latest admission: {}", date);
    }

    header("Normalization");
    println!("{}", report.term_table().for_terminal());
    for rejection in report.rejections.iter() {
        println!("  {}", rejection);
    }

    let episodes = group_all(&visits, &config.group_config());

    header("Episodes");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Rule"))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for (group_type, count) in episodes.count_by_group_type() {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(group_type.to_string()))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(format!(
                    "{:.1}%",
                    count as f64 / episodes.len() as f64 * 100.
                ))),
        );
    }
    println!("{}", table);
    println!(
        "{} visits grouped into {} episodes (gap threshold {} days)",
        visits.len(),
        episodes.len(),
        config.gap_threshold_days
    );

    header("Preview");
    let rows = episodes.reduce();
    let preview = &rows[..rows.len().min(opt.preview)];
    println!("{}", episode::term_table(preview).for_terminal());
    Ok(())
}
