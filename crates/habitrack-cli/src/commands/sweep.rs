use std::time::Duration;

use clap::Subcommand;
use habitrack_core::{Config, ExpirySweeper, SweepScope};

use super::{open_engine, print_json};

#[derive(Subcommand)]
pub enum SweepAction {
    /// Run a single sweep and print the report
    Run {
        /// Only sweep this user's habits
        #[arg(long)]
        user: Option<i64>,
    },
    /// Keep sweeping until interrupted
    Watch {
        /// Seconds between sweeps (default: sweeper.tick_secs)
        #[arg(long)]
        tick_secs: Option<u64>,
    },
}

pub fn run(action: SweepAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SweepAction::Run { user } => {
            let scope = user.map_or(SweepScope::All, SweepScope::User);
            let report = ExpirySweeper::new(open_engine()?)
                .scoped(scope)
                .sweep_once()?;
            print_json(&report)?;
        }
        SweepAction::Watch { tick_secs } => {
            let config = Config::load()?;
            if !config.sweeper.enabled {
                return Err("sweeper is disabled (sweeper.enabled = false)".into());
            }
            let tick = match tick_secs {
                Some(0) => return Err("--tick-secs must be at least 1".into()),
                Some(secs) => Duration::from_secs(secs),
                None => config.sweep_tick(),
            };
            let sweeper = ExpirySweeper::new(open_engine()?);

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async move {
                tracing::info!(tick_secs = tick.as_secs(), "expiry sweeper started");
                let handle = sweeper.spawn(tick);
                tokio::signal::ctrl_c().await?;
                handle.abort();
                tracing::info!("expiry sweeper stopped");
                Ok::<_, std::io::Error>(())
            })?;
        }
    }
    Ok(())
}
