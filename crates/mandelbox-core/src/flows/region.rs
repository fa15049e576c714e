// Region discovery with a bounded retry.
//
// Right after boot the network stack may not be up yet, so an empty
// proximity list is retried at a fixed delay. Each empty round is a
// pending outcome carrying the attempt number; only exhausting every
// attempt is a failure.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::debug;

use mandelbox_api::Region;

use crate::config::RegionPolicy;
use crate::flow::{Flow, Outcome};
use crate::model::CreateFailure;
use crate::providers::RegionSource;

pub fn region_flow(
    source: Arc<dyn RegionSource>,
    policy: RegionPolicy,
) -> Flow<(), Vec<Region>, CreateFailure, u32> {
    let policy = Arc::new(policy);
    Flow::new("regions", move |input| {
        let source = Arc::clone(&source);
        let policy = Arc::clone(&policy);
        input
            .flat_map(move |()| probe(Arc::clone(&source), Arc::clone(&policy)))
            .boxed()
    })
}

fn probe(
    source: Arc<dyn RegionSource>,
    policy: Arc<RegionPolicy>,
) -> crate::flow::FlowStream<Vec<Region>, CreateFailure, u32> {
    async_stream::stream! {
        if let Some(region) = policy.pinned {
            debug!(%region, "using pinned region");
            yield Outcome::Success(vec![region]);
            return;
        }

        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            let regions = source.sorted_regions(&policy.allowed).await;
            if !regions.is_empty() {
                yield Outcome::Success(regions);
                return;
            }
            debug!(attempt, attempts, "no reachable region yet");
            if attempt == attempts {
                break;
            }
            yield Outcome::Pending(attempt);
            tokio::time::sleep(policy.retry_delay).await;
        }
        yield Outcome::Failure(CreateFailure::NoRegions { attempts });
    }
    .boxed()
}
