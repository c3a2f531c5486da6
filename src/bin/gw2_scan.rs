//! Headless runner for the flip scan and the profit report.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use gw2_analyzer::config::{AppConfig, CONFIG_FILE};
use gw2_analyzer::jobs::{self, StatusLog};

#[derive(Parser)]
#[command(name = "gw2-scan")]
#[command(about = "Guild Wars 2 trading post flip scanner and profit report")]
struct Cli {
    /// Config file; defaults apply when it does not exist
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the trading post and write the flip report
    Flips {
        /// Fetch hourly history for every scraped item
        #[arg(long)]
        historical: bool,
        /// Pages to scrape, 0 for all
        #[arg(long)]
        pages: Option<u32>,
        /// History window in days
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Summarise account buys and sells into the profit report
    Profit {
        /// Transaction window in days
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    gw2_analyzer::init_logging();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load(&cli.config);
    let status = StatusLog::silent();

    match cli.command {
        Commands::Flips { historical, pages, days, output_dir } => {
            cfg.historical |= historical;
            if let Some(p) = pages {
                cfg.max_pages = p;
            }
            if let Some(d) = days {
                cfg.history_days = d;
            }
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }

            let scan = jobs::run_flip_scan(&cfg, &status)?;
            let actionable = scan.rows.iter().filter(|r| r.actionable()).count();
            info!(rows = scan.rows.len(), actionable, "Flip scan finished");
            if let Some(path) = scan.report {
                println!("{}", path.display());
            }
        }
        Commands::Profit { days, output_dir } => {
            if let Some(d) = days {
                cfg.transaction_days = d;
            }
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }

            let scan = jobs::run_profit_report(&cfg, &status)?;
            let total: f64 = scan.rows.iter().map(|r| r.profit).sum();
            info!(items = scan.rows.len(), total_profit = total, "Profit report finished");
            for path in [scan.csv, scan.html].into_iter().flatten() {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flips_flags() {
        let cli = Cli::try_parse_from(["gw2-scan", "flips", "--historical", "--pages", "3", "--output-dir", "out"]).unwrap();
        match cli.command {
            Commands::Flips { historical, pages, days, output_dir } => {
                assert!(historical);
                assert_eq!(pages, Some(3));
                assert_eq!(days, None);
                assert_eq!(output_dir, Some(PathBuf::from("out")));
            }
            Commands::Profit { .. } => panic!("expected flips"),
        }
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
    }

    #[test]
    fn parses_profit_days() {
        let cli = Cli::try_parse_from(["gw2-scan", "profit", "--days", "14"]).unwrap();
        assert!(matches!(cli.command, Commands::Profit { days: Some(14), .. }));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["gw2-scan", "sell-everything"]).is_err());
    }
}
