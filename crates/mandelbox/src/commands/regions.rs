//! `mandelbox regions`: probe and rank regions.

use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;

use mandelbox_api::{Region, RegionProber};
use mandelbox_config as config;

use crate::cli::{GlobalOpts, RegionsArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Tabled, Serialize)]
struct RegionRow {
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Latency")]
    #[serde(skip)]
    latency: String,
    #[tabled(skip)]
    latency_ms: u128,
}

impl RegionRow {
    fn new(region: Region, latency: Duration) -> Self {
        // Whole milliseconds read better than humantime's nanosecond tail.
        let rounded = Duration::from_millis(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
        Self {
            region: region.to_string(),
            latency: humantime::format_duration(rounded).to_string(),
            latency_ms: latency.as_millis(),
        }
    }
}

pub async fn handle(args: RegionsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (cfg, _) = super::load(global)?;
    let launcher = config::to_launcher_config(&cfg)?;
    let candidates = if args.all {
        Region::all()
    } else {
        launcher.regions.allowed.clone()
    };

    let bar = output::spinner(global.quiet);
    bar.set_message(format!("Probing {} regions", candidates.len()));
    let prober = RegionProber::new(&launcher.transport)?;
    let ranked = prober.sort_by_proximity(&candidates).await;
    bar.finish_and_clear();

    if ranked.is_empty() {
        return Err(CliError::NoRegions);
    }
    let rows: Vec<RegionRow> = ranked
        .iter()
        .map(|ping| RegionRow::new(ping.region, ping.latency))
        .collect();
    output::print_output(&output::render_list(global.output, &rows)?, global.quiet);
    Ok(())
}
