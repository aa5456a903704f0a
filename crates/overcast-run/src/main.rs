//! Scheduled cloud-coverage daemon: capture → analyze → persist / report / deliver,
//! every few minutes, until killed.

mod capture;
mod delivery;
mod report;
mod store;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use overcast_core::boundary;
use overcast_core::sinks::Capture;
use overcast_core::{Collaborators, Config, CycleOutcome, Scheduler, SystemClock};

use crate::capture::{CommandCapture, FileCapture};
use crate::delivery::HttpTransport;
use crate::report::HtmlReporter;
use crate::store::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "overcast", about = "Per-region cloud coverage from satellite screenshots")]
struct Args {
    /// JSON deployment config; omitted fields take their defaults.
    #[arg(short, long, global = true, default_value = "overcast.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Cmd>,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Analyze this full-size PNG instead of running the capture command.
    #[arg(long)]
    frame: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Cmd {
    /// Print stored records as JSON, newest first.
    History {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    if let Some(Cmd::History { limit }) = args.command {
        let store = SqliteStore::open(&config.output.database)
            .with_context(|| format!("opening {}", config.output.database.display()))?;
        let records = store.recent(limit)?;
        info!("{} stored records", records.len());
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let layer = boundary::load(&config.boundary_path, &config.district)?;

    let capture: Box<dyn Capture> = match args.frame {
        Some(path) => Box::new(FileCapture::new(path, config.crop_box)),
        None => Box::new(CommandCapture::new(config.capture.clone(), config.crop_box)),
    };
    let store = SqliteStore::open(&config.output.database)
        .with_context(|| format!("opening {}", config.output.database.display()))?;
    let transport = HttpTransport::new(config.delivery.timeout_secs)?;

    let parts = Collaborators {
        capture,
        store: Box::new(store),
        reporter: Box::new(HtmlReporter),
        transport: Box::new(transport),
        clock: Box::new(SystemClock),
    };
    let mut scheduler = Scheduler::new(&config, &layer, parts)?;

    if args.once {
        for outcome in scheduler.run_cycles(1) {
            if let CycleOutcome::Aborted(err) = outcome {
                return Err(err.into());
            }
        }
        return Ok(());
    }
    scheduler.run_forever()
}
