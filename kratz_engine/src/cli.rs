use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Headless host that drives sprite behavior scripts tick by tick",
    version
)]
pub struct Args {
    /// Path to a Lua behavior script to load
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Run the built-in demo script instead of loading a file
    #[arg(long)]
    pub demo: bool,

    /// Number of ticks to drive
    #[arg(long, default_value_t = 60)]
    pub ticks: u64,

    /// Milliseconds to sleep between ticks (0 = run flat out)
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u64,

    /// Key press to inject before a given tick, as KEY@TICK (repeatable)
    #[arg(long, value_name = "KEY@TICK")]
    pub press: Vec<String>,

    /// Path to write the runtime event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Path to write rendered frame snapshots as JSON
    #[arg(long)]
    pub frame_log_json: Option<PathBuf>,

    /// Path to write per-tick scheduling summaries as JSON
    #[arg(long)]
    pub tick_log_json: Option<PathBuf>,

    /// Path to write the arm-queue history as JSON
    #[arg(long)]
    pub scheduler_json: Option<PathBuf>,

    /// Echo event log lines as they are recorded
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub struct RunArgs {
    pub script: Option<PathBuf>,
    pub demo: bool,
    pub ticks: u64,
    pub tick_ms: u64,
    pub press: Vec<String>,
    pub event_log_json: Option<PathBuf>,
    pub frame_log_json: Option<PathBuf>,
    pub tick_log_json: Option<PathBuf>,
    pub scheduler_json: Option<PathBuf>,
    pub verbose: bool,
}

pub fn parse() -> Result<RunArgs> {
    let args = Args::parse();
    args.into_run()
}

impl Args {
    fn into_run(self) -> Result<RunArgs> {
        if self.script.is_some() && self.demo {
            bail!("--demo cannot be combined with --script");
        }
        if self.script.is_none() && !self.demo {
            bail!("either --script or --demo is required");
        }

        Ok(RunArgs {
            script: self.script,
            demo: self.demo,
            ticks: self.ticks,
            tick_ms: self.tick_ms,
            press: self.press,
            event_log_json: self.event_log_json,
            frame_log_json: self.frame_log_json,
            tick_log_json: self.tick_log_json,
            scheduler_json: self.scheduler_json,
            verbose: self.verbose,
        })
    }
}
