//! Scheduler: one cron-aligned trigger per active (symbol, resolution)
//! candle, a periodic refresh that diffs the registry against the set of
//! running jobs, periodic reconciliation, a heartbeat log, and graceful
//! shutdown on SIGINT/SIGTERM (spawn, select on a shutdown signal, abort
//! every tracked job before returning).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cron::Schedule;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::reconciler;
use crate::registry::CandleKey;
use crate::time::{next_candle_close, resolution_to_cron_checked};

pub struct Scheduler {
    ctx: Arc<EngineContext>,
    jobs: Mutex<HashMap<CandleKey, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Runs forever, reconciling active candles into running jobs every
    /// `scheduler_refresh_interval`, reconciling cache/store every
    /// `scheduler_reconcile_interval`, and logging a heartbeat every
    /// `scheduler_heartbeat_interval`, until SIGINT/SIGTERM. On shutdown
    /// every tracked cron job is aborted before `run` returns.
    pub async fn run(&self) -> EngineResult<()> {
        let mut refresh = tokio::time::interval(self.ctx.config.scheduler_refresh_interval);
        let mut reconcile = tokio::time::interval(self.ctx.config.scheduler_reconcile_interval);
        let mut heartbeat = tokio::time::interval(self.ctx.config.scheduler_heartbeat_interval);

        self.refresh_jobs().await?;

        loop {
            tokio::select! {
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh_jobs().await {
                        error!(error = %e, "scheduler refresh failed");
                    }
                }
                _ = reconcile.tick() => {
                    match reconciler::reconcile(&self.ctx).await {
                        Ok(report) => {
                            if report.orphaned > 0 || report.missing > 0 || !report.errors.is_empty() {
                                info!(orphaned = report.orphaned, missing = report.missing, errors = ?report.errors, "reconciliation applied changes");
                            }
                        }
                        Err(e) => error!(error = %e, "reconciliation pass failed"),
                    }
                }
                _ = heartbeat.tick() => {
                    let jobs = self.jobs.lock().await.len();
                    info!(active_candles = jobs, worker_id = %self.ctx.config.worker_id, "scheduler heartbeat");
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received, stopping scheduler loop");
                    break;
                }
            }
        }

        self.abort_all_jobs().await;
        Ok(())
    }

    /// Stops every tracked cron job deterministically instead of leaving
    /// them to die implicitly with the process.
    async fn abort_all_jobs(&self) {
        let mut jobs = self.jobs.lock().await;
        let count = jobs.len();
        for (key, handle) in jobs.drain() {
            handle.abort();
            info!(symbol = %key.symbol, resolution = %key.resolution, "candle job aborted for shutdown");
        }
        info!(stopped = count, "all cron jobs stopped");
    }

    /// Diffs `registry.active_candles()` against the currently running
    /// jobs: spawns a job for every new candle, and aborts jobs for
    /// candles no longer registered anywhere.
    async fn refresh_jobs(&self) -> EngineResult<()> {
        self.ctx.registry.refresh().await?;
        let active = self.ctx.registry.active_candles().await?;
        let active_set: std::collections::HashSet<_> = active.iter().cloned().collect();

        let mut jobs = self.jobs.lock().await;

        jobs.retain(|key, handle| {
            if active_set.contains(key) {
                true
            } else {
                handle.abort();
                info!(symbol = %key.symbol, resolution = %key.resolution, "candle no longer active, job stopped");
                false
            }
        });

        for key in active {
            if jobs.contains_key(&key) {
                continue;
            }
            if let Err(e) = resolution_to_cron_checked(&key.resolution) {
                warn!(resolution = %key.resolution, error = %e, "skipping candle with unparseable resolution");
                continue;
            }
            let handle = self.spawn_candle_job(key.clone());
            jobs.insert(key, handle);
        }

        Ok(())
    }

    fn spawn_candle_job(&self, key: CandleKey) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            loop {
                let now = chrono::Utc::now();
                let next = match next_candle_close(now, &key.resolution) {
                    Ok(t) => t,
                    Err(e) => {
                        error!(resolution = %key.resolution, error = %e, "candle job exiting: resolution became invalid");
                        return;
                    }
                };
                cross_check_against_cron(&key.resolution, next);

                let sleep_for = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(sleep_for).await;

                ctx.events.publish(crate::event_bus::EngineEvent::CandleClose {
                    symbol: key.symbol.clone(),
                    resolution: key.resolution.clone(),
                });
                ctx.coordinator.execute_candle_strategies(&key.symbol, &key.resolution, next).await;
            }
        })
    }
}

/// Cross-checks `next_candle_close`'s boundary against the resolution's
/// cron pattern; a mismatch only ever indicates a bug
/// in one of the two derivations, so it is logged, not acted on.
fn cross_check_against_cron(resolution: &str, expected: chrono::DateTime<chrono::Utc>) {
    let (pattern, _) = match resolution_to_cron_checked(resolution) {
        Ok(v) => v,
        Err(_) => return,
    };
    let full_pattern = format!("0 {pattern}");
    let schedule = match Schedule::from_str(&full_pattern) {
        Ok(s) => s,
        Err(_) => return,
    };
    if let Some(cron_next) = schedule.after(&(expected - chrono::Duration::seconds(1))).next() {
        if (cron_next - expected).num_seconds().abs() > 1 {
            warn!(
                resolution,
                expected = %expected,
                cron_next = %cron_next,
                "candle boundary and cron pattern disagree"
            );
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}
