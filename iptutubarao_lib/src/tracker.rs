//! Refresh cycles and their scheduling.
//!
//! A [`DebtTracker`] runs one fetch+extract cycle for one taxpayer and writes
//! the outcome to the shared [`ResultCache`]. The [`Scheduler`] owns one
//! tracker per taxpayer, each in its own task driven by an interval timer, so
//! cycles for the same taxpayer never overlap while different taxpayers run
//! independently. Re-tracking a taxpayer waits for the cycle left over from
//! its previous registration before the first new one starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meuiptu_api::{Client, TaxpayerId, DEFAULT_TIMEOUT};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::ResultCache;
use crate::error::IptuError;
use crate::extract::extract;
use crate::result::DebtQueryResult;

/// Default time between refresh cycles: once a day.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Settings shared by every tracker a [`Scheduler`] creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
    /// Portal host override. `None` targets the production portal.
    pub base_url: Option<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_TIMEOUT,
            base_url: None,
        }
    }
}

impl RefreshConfig {
    /// Reads `IPTU_REFRESH_SECS`, `IPTU_TIMEOUT_SECS` and `IPTU_BASE_URL`,
    /// falling back to the defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_secs("IPTU_REFRESH_SECS").unwrap_or(defaults.interval),
            request_timeout: env_secs("IPTU_TIMEOUT_SECS").unwrap_or(defaults.request_timeout),
            base_url: std::env::var("IPTU_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn validate(&self) -> Result<(), IptuError> {
        if self.interval.is_zero() {
            return Err(IptuError::InvalidInput(
                "refresh interval must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(IptuError::InvalidInput(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds a fresh portal client for one taxpayer.
    pub fn build_client(&self) -> Result<Client, IptuError> {
        let client = match &self.base_url {
            Some(url) => Client::with_base_url(url)?,
            None => Client::new()?,
        };
        Ok(client.with_timeout(self.request_timeout))
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// Runs refresh cycles for a single taxpayer.
///
/// Owns its portal client, so the session cookie jar is never shared with
/// another taxpayer. `refresh` takes `&mut self`: one cycle at a time.
pub struct DebtTracker {
    taxpayer: TaxpayerId,
    client: Client,
    cache: Arc<ResultCache>,
    generation: u64,
}

impl DebtTracker {
    /// Creates a tracker and registers `taxpayer` in the cache.
    ///
    /// Outcomes are only written while that registration is current: once
    /// the taxpayer is removed from the cache, this tracker's writes are
    /// dropped even if the taxpayer is registered again later.
    pub fn new(taxpayer: TaxpayerId, client: Client, cache: Arc<ResultCache>) -> Self {
        let generation = cache.register(&taxpayer);
        Self {
            taxpayer,
            client,
            cache,
            generation,
        }
    }

    pub fn taxpayer(&self) -> &TaxpayerId {
        &self.taxpayer
    }

    /// Runs one fetch+extract cycle and records the outcome.
    ///
    /// On failure the cached result is left untouched and the error is
    /// recorded next to it.
    pub async fn refresh(&mut self) -> Result<DebtQueryResult, IptuError> {
        let started = Utc::now();
        match self.run_cycle().await {
            Ok(result) => {
                tracing::info!(
                    "Refreshed {}: {} (owner: {}, total: {:?}, next due: {:?})",
                    self.taxpayer.formatted(),
                    result.status_message,
                    result.owner_name,
                    result.total_amount,
                    result.next_due_date
                );
                if result.signals_disagree() {
                    tracing::warn!(
                        "Debt marker and total amount disagree for {} (marker: {}, total: {:?})",
                        self.taxpayer.formatted(),
                        result.has_debt,
                        result.total_amount
                    );
                }
                self.cache
                    .record_success(self.generation, result.clone(), started);
                Ok(result)
            }
            Err(err) => {
                tracing::warn!(
                    "Refresh failed for {} ({}), keeping previous result: {}",
                    self.taxpayer.formatted(),
                    err.kind(),
                    err
                );
                self.cache
                    .record_failure(&self.taxpayer, self.generation, &err, started);
                Err(err)
            }
        }
    }

    async fn run_cycle(&self) -> Result<DebtQueryResult, IptuError> {
        let html = self.client.fetch(&self.taxpayer).await?;
        Ok(extract(&html, &self.taxpayer)?)
    }
}

/// Outcome of one scheduled cycle, broadcast to subscribers.
#[derive(Debug, Clone)]
pub struct RefreshEvent {
    pub taxpayer: TaxpayerId,
    /// `Ok(has_debt)` on success, the error message on failure.
    pub outcome: Result<bool, String>,
}

struct TrackerHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Keeps one refresh task per tracked taxpayer.
///
/// Each task refreshes immediately on registration and then once per
/// interval. A failed cycle is not retried early: the next attempt happens at
/// the next tick.
pub struct Scheduler {
    config: RefreshConfig,
    cache: Arc<ResultCache>,
    tasks: HashMap<TaxpayerId, TrackerHandle>,
    /// Stopped tasks that may still be finishing a cycle.
    draining: HashMap<TaxpayerId, JoinHandle<()>>,
    events: broadcast::Sender<RefreshEvent>,
}

impl Scheduler {
    pub fn new(config: RefreshConfig, cache: Arc<ResultCache>) -> Result<Self, IptuError> {
        config.validate()?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            config,
            cache,
            tasks: HashMap::new(),
            draining: HashMap::new(),
            events,
        })
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Receives an event after every completed cycle.
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    /// Starts refreshing `taxpayer`. Returns `Ok(false)` if it is already
    /// tracked. Must be called from within a tokio runtime.
    ///
    /// If an earlier task for `taxpayer` is still finishing a cycle, the new
    /// task waits for it before its first refresh.
    pub fn track(&mut self, taxpayer: TaxpayerId) -> Result<bool, IptuError> {
        if self.tasks.contains_key(&taxpayer) {
            return Ok(false);
        }
        let client = self.config.build_client()?;
        let tracker = DebtTracker::new(taxpayer.clone(), client, Arc::clone(&self.cache));
        let previous = self.draining.remove(&taxpayer);
        let (stop, stop_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(
            tracker,
            previous,
            self.config.interval,
            stop_rx,
            self.events.clone(),
        ));
        tracing::info!(
            "Tracking {} every {}s",
            taxpayer.formatted(),
            self.config.interval.as_secs()
        );
        self.tasks.insert(taxpayer, TrackerHandle { stop, join });
        Ok(true)
    }

    /// Stops scheduling `taxpayer` and drops its cached snapshot. A cycle
    /// already in flight runs to completion (or timeout) but its outcome is
    /// discarded.
    pub fn untrack(&mut self, taxpayer: &TaxpayerId) -> bool {
        self.draining.retain(|_, join| !join.is_finished());
        let Some(handle) = self.tasks.remove(taxpayer) else {
            return false;
        };
        let _ = handle.stop.send(true);
        self.cache.remove(taxpayer);
        if !handle.join.is_finished() {
            self.draining.insert(taxpayer.clone(), handle.join);
        }
        tracing::info!("Stopped tracking {}", taxpayer.formatted());
        true
    }

    /// Tracked taxpayers, sorted.
    pub fn tracked(&self) -> Vec<TaxpayerId> {
        let mut ids: Vec<TaxpayerId> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Signals every task to stop and waits for in-flight cycles to finish.
    pub async fn shutdown(mut self) {
        for handle in self.tasks.values() {
            let _ = handle.stop.send(true);
        }
        let joins = self
            .tasks
            .drain()
            .map(|(taxpayer, handle)| (taxpayer, handle.join))
            .chain(self.draining.drain());
        for (taxpayer, join) in joins {
            if let Err(e) = join.await {
                tracing::error!("Refresh task for {} ended abnormally: {}", taxpayer, e);
            }
        }
    }
}

async fn run_loop(
    mut tracker: DebtTracker,
    previous: Option<JoinHandle<()>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    events: broadcast::Sender<RefreshEvent>,
) {
    if let Some(previous) = previous {
        tracing::debug!(
            "Waiting for the previous refresh task of {} to finish",
            tracker.taxpayer()
        );
        if let Err(e) = previous.await {
            tracing::error!(
                "Previous refresh task for {} ended abnormally: {}",
                tracker.taxpayer(),
                e
            );
        }
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }
        let outcome = tracker
            .refresh()
            .await
            .map(|result| result.has_debt)
            .map_err(|e| e.to_string());
        if *stop.borrow() {
            break;
        }
        let _ = events.send(RefreshEvent {
            taxpayer: tracker.taxpayer().clone(),
            outcome,
        });
    }
    tracing::debug!("Refresh loop for {} exited", tracker.taxpayer());
}
