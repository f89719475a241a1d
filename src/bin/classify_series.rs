//! classify-series - sort heudiconv series into BIDS outputs

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;
use std::path::PathBuf;

use normstar::heuristic::{
    self, Category, IntendedForOptions, RenderedSeries, INTENDED_FOR_OPTIONS,
};

/// Classify the series of a heudiconv dicominfo.tsv into BIDS output paths
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, arg_required_else_help = true)]
struct Args {
    /// heudiconv dicominfo.tsv table
    #[arg(long, value_name = "TSV")]
    dicominfo: PathBuf,

    /// Subject label used in output paths
    #[arg(long, value_name = "ID")]
    subject: String,

    /// Print the assignment as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct KeyReport<'a> {
    category: Category,
    template: &'static str,
    outtypes: Vec<String>,
    series: Vec<&'a RenderedSeries>,
}

#[derive(Serialize)]
struct Report<'a> {
    subject: &'a str,
    keys: Vec<KeyReport<'a>>,
    intended_for: IntendedForOptions,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let subject = args.subject.strip_prefix("sub-").unwrap_or(&args.subject);

    let series = heuristic::read_dicominfo(&args.dicominfo)
        .with_context(|| format!("failed to read {}", args.dicominfo.display()))?;
    info!("{} series in {}", series.len(), args.dicominfo.display());

    let assignment = heuristic::classify(&series);
    let rendered = assignment
        .render(subject)
        .context("failed to render output paths")?;

    if args.json {
        let keys = Category::ALL
            .iter()
            .map(|&category| {
                Ok(KeyReport {
                    category,
                    template: category.template(),
                    outtypes: category.output_key()?.outtypes,
                    series: rendered.iter().filter(|r| r.category == category).collect(),
                })
            })
            .collect::<normstar::Result<Vec<_>>>()
            .context("failed to build output keys")?;
        let report = Report {
            subject,
            keys,
            intended_for: INTENDED_FOR_OPTIONS,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (category, assigned) in assignment.iter() {
            println!("{} ({} series)", category.template(), assigned.len());
            for r in rendered.iter().filter(|r| r.category == category) {
                println!("  {} -> {}", r.series_id, r.path);
            }
        }
    }
    Ok(())
}
