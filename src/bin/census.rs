//! Which patients were in hospital on a date, or at any point in a date range.
use chrono::NaiveDate;
use clap::Parser;
use inpatient_census::{census::Census, export, header, load_episodes, Config};
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
    /// Patients in hospital on this date (YYYY-MM-DD).
    #[clap(long, short)]
    date: Option<NaiveDate>,
    /// Start of a date range (inclusive). Use with --end.
    #[clap(long)]
    start: Option<NaiveDate>,
    /// End of a date range (inclusive). Use with --start.
    #[clap(long)]
    end: Option<NaiveDate>,
    /// Save the selected patients to this CSV file.
    #[clap(long, short)]
    out: Option<PathBuf>,
    /// If set, allow overwriting an existing file at the save location
    #[clap(long)]
    overwrite: bool,
    /// If set, fail when any row of the extract was rejected.
    #[clap(long)]
    strict: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let mut config = Config::load_or_default(opt.config.as_deref())?;
    if let Some(gap) = opt.gap_threshold {
        config.gap_threshold_days = gap;
    }

    let (report, episodes) = load_episodes(&opt.input, &config)?;
    if opt.strict {
        ensure!(
            report.rejections.is_empty(),
            "{} rows were rejected, first: {}",
            report.rejections.len(),
            report.rejections[0]
        );
    }
    let rows = episodes.reduce();
    let census = Census::new(&rows);

    let selected = match (opt.date, opt.start, opt.end) {
        (Some(date), None, None) => {
            header(&format!("In hospital on {}", date));
            census.active_on(date)
        }
        (None, Some(start), Some(end)) => {
            header(&format!("In hospital between {} and {}", start, end));
            census.overlapping(start, end)?
        }
        _ => bail!("please supply exactly one of --date, or --start with --end"),
    };

    let patients = export::select_patients(selected.iter().copied());
    println!("{}", export::term_table(&patients).for_terminal());
    println!(
        "{} patients ({} episodes)",
        patients.len(),
        selected.len()
    );

    if let Some(out) = opt.out {
        export::save_csv(&patients, &out, opt.overwrite)?;
    }
    Ok(())
}
