// Cloud regions and latency probing.
//
// Proximity is measured by timing plain HTTP requests to each region's
// public DynamoDB endpoint. Any HTTP answer (a 404 included) counts as a
// successful probe; only transport errors count as failures.

use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Regions a mandelbox can be assigned in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
pub enum Region {
    #[strum(serialize = "us-east-1")]
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[strum(serialize = "us-east-2")]
    #[serde(rename = "us-east-2")]
    UsEast2,
    #[strum(serialize = "us-west-1")]
    #[serde(rename = "us-west-1")]
    UsWest1,
    #[strum(serialize = "us-west-2")]
    #[serde(rename = "us-west-2")]
    UsWest2,
    #[strum(serialize = "ca-central-1")]
    #[serde(rename = "ca-central-1")]
    CaCentral1,
    #[strum(serialize = "sa-east-1")]
    #[serde(rename = "sa-east-1")]
    SaEast1,
    #[strum(serialize = "eu-central-1")]
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    #[strum(serialize = "eu-west-1")]
    #[serde(rename = "eu-west-1")]
    EuWest1,
    #[strum(serialize = "eu-west-2")]
    #[serde(rename = "eu-west-2")]
    EuWest2,
    #[strum(serialize = "eu-west-3")]
    #[serde(rename = "eu-west-3")]
    EuWest3,
    #[strum(serialize = "eu-north-1")]
    #[serde(rename = "eu-north-1")]
    EuNorth1,
    #[strum(serialize = "ap-south-1")]
    #[serde(rename = "ap-south-1")]
    ApSouth1,
    #[strum(serialize = "ap-northeast-1")]
    #[serde(rename = "ap-northeast-1")]
    ApNortheast1,
    #[strum(serialize = "ap-northeast-2")]
    #[serde(rename = "ap-northeast-2")]
    ApNortheast2,
    #[strum(serialize = "ap-southeast-1")]
    #[serde(rename = "ap-southeast-1")]
    ApSoutheast1,
    #[strum(serialize = "ap-southeast-2")]
    #[serde(rename = "ap-southeast-2")]
    ApSoutheast2,
}

impl Region {
    /// Regions mandelboxes are offered in unless configured otherwise.
    pub const DEFAULT_ALLOWED: [Self; 5] = [
        Self::UsEast1,
        Self::UsEast2,
        Self::UsWest1,
        Self::UsWest2,
        Self::CaCentral1,
    ];

    /// Every known region.
    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }
}

/// A region together with its best observed probe latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPing {
    pub region: Region,
    pub latency: Duration,
}

/// Measures round-trip latency to regions over HTTP.
#[derive(Clone)]
pub struct RegionProber {
    http: reqwest::Client,
    pings: usize,
    endpoint: Option<Url>,
}

impl RegionProber {
    pub const DEFAULT_PINGS: usize = 3;

    /// Create a prober from a `TransportConfig`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?))
    }

    /// Create a prober with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            pings: Self::DEFAULT_PINGS,
            endpoint: None,
        }
    }

    /// Probe `{endpoint}/{region}/does-not-exist` instead of the public
    /// regional endpoints.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Number of probes sent per region; the fastest one wins.
    pub fn with_pings(mut self, pings: usize) -> Self {
        self.pings = pings.max(1);
        self
    }

    fn probe_url(&self, region: Region) -> Result<Url, Error> {
        let cache_break = format!("{:x}", rand::random::<u64>());
        let mut url = match &self.endpoint {
            Some(base) => base.join(&format!("{region}/does-not-exist"))?,
            None => Url::parse(&format!(
                "http://dynamodb.{region}.amazonaws.com/does-not-exist"
            ))?,
        };
        url.query_pairs_mut().append_pair("cache-break", &cache_break);
        Ok(url)
    }

    async fn probe_once(&self, region: Region) -> Option<Duration> {
        let url = self.probe_url(region).ok()?;
        let started = Instant::now();
        match self.http.get(url).send().await {
            Ok(_) => Some(started.elapsed()),
            Err(e) => {
                trace!(%region, error = %e, "region probe failed");
                None
            }
        }
    }

    /// Best latency over all probes, or `None` when every probe failed.
    pub async fn ping(&self, region: Region) -> Option<Duration> {
        let probes = (0..self.pings).map(|_| self.probe_once(region));
        join_all(probes).await.into_iter().flatten().min()
    }

    /// Probe every region concurrently and return the reachable ones,
    /// nearest first.
    pub async fn sort_by_proximity(&self, regions: &[Region]) -> Vec<RegionPing> {
        let probes = regions.iter().map(|&region| async move {
            self.ping(region)
                .await
                .map(|latency| RegionPing { region, latency })
        });

        let mut reachable: Vec<RegionPing> = join_all(probes).await.into_iter().flatten().collect();
        reachable.sort_by_key(|ping| ping.latency);

        debug!(
            sorted = ?reachable.iter().map(|p| p.region.as_ref()).collect::<Vec<_>>(),
            "sorted regions by proximity"
        );
        reachable
    }
}
