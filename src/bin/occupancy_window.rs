//! Daily and whole-window distinct patient counts for the days leading up to a date.
use chrono::{Local, NaiveDate};
use clap::Parser;
use inpatient_census::{header, load_episodes, Census, Config};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Opt {
    /// The admissions extract (CSV).
    input: PathBuf,
    /// Settings file (TOML). Defaults are used if not given.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Override the gap threshold (in days) from the settings file.
    #[clap(long)]
    gap_threshold: Option<i64>,
    /// Last day of the window. Defaults to today.
    #[clap(long, short)]
    date: Option<NaiveDate>,
    /// Override the window length from the settings file.
    #[clap(long, short)]
    window_days: Option<u32>,
    /// Print the counts as JSON instead of a table.
    #[clap(long)]
    json: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let mut config = Config::load_or_default(opt.config.as_deref())?;
    if let Some(gap) = opt.gap_threshold {
        config.gap_threshold_days = gap;
    }
    if let Some(days) = opt.window_days {
        config.window_days = days;
    }
    let date = opt
        .date
        .unwrap_or_else(|| Local::now().naive_local().date());

    let (_, episodes) = load_episodes(&opt.input, &config)?;
    let rows = episodes.reduce();
    let window = Census::new(&rows).window(date, config.window_days);

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&window)?);
        return Ok(());
    }

    header(&format!(
        "Occupancy for the {} days ending {}",
        config.window_days, date
    ));
    println!("{}", window.term_table().for_terminal());
    println!(
        "{} distinct patients in the window (busiest day: {})",
        window.window_patients,
        window
            .daily
            .iter()
            .map(|count| count.patients)
            .max()
            .unwrap_or(0)
    );
    Ok(())
}
