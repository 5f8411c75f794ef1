//! Request identity rotation and pacing
//!
//! Each request goes out with a randomly chosen user agent and, when proxies
//! are configured, through the current proxy. The proxy advances every
//! `rotate_proxy_every` requests. Pacing delays are drawn uniformly from the
//! configured range.

use crate::config::FetcherConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::{redirect::Policy, Client, Proxy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The identity one request is sent with
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub client: Client,
    /// Index into the configured proxy list; None for direct connections
    pub proxy: Option<usize>,
}

/// Rotates user agents and egress proxies across requests
#[derive(Debug)]
pub struct IdentityRotator {
    user_agents: Vec<String>,
    clients: Vec<Client>,
    direct: bool,
    rotate_every: u64,
    requests: AtomicU64,
    min_delay: Duration,
    max_delay: Duration,
}

impl IdentityRotator {
    /// Builds one HTTP client per proxy (or a single direct client)
    ///
    /// # Arguments
    ///
    /// * `config` - Fetcher configuration
    /// * `timeout` - Per-request timeout applied by the clients
    pub fn new(config: &FetcherConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let direct = config.proxies.is_empty();
        let clients = if direct {
            vec![build_http_client(timeout, None)?]
        } else {
            config
                .proxies
                .iter()
                .map(|proxy| build_http_client(timeout, Some(proxy)))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            user_agents: config.user_agents.clone(),
            clients,
            direct,
            rotate_every: u64::from(config.rotate_proxy_every.max(1)),
            requests: AtomicU64::new(0),
            min_delay: Duration::from_millis(config.min_action_delay_ms),
            max_delay: Duration::from_millis(config.max_action_delay_ms),
        })
    }

    /// Picks the identity for the next request
    pub fn next_identity(&self) -> Identity {
        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        let index = ((n / self.rotate_every) % self.clients.len() as u64) as usize;

        let user_agent = self
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| format!("college-harvest/{}", env!("CARGO_PKG_VERSION")));

        Identity {
            user_agent,
            client: self.clients[index].clone(),
            proxy: if self.direct { None } else { Some(index) },
        }
    }

    /// Random delay within the configured pacing range
    pub fn pacing_delay(&self) -> Duration {
        random_between(self.min_delay, self.max_delay)
    }

    /// A direct client for auxiliary requests such as robots.txt
    pub fn direct_client(&self) -> Client {
        self.clients[0].clone()
    }
}

/// Uniformly random duration in `[min, max]`
pub fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Builds an HTTP client with compression and a bounded redirect chain
pub fn build_http_client(timeout: Duration, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}
