//! # Task Supervisor
//!
//! Starts the long-lived services in a fixed order (broker, a short grace
//! delay for the listener to bind, then ingestor, publisher and backup
//! scheduler) and keeps each cancellable service alive behind its own
//! restart policy. A service that returns `Err` is rebuilt after an
//! exponentially growing delay; its siblings never notice. A service that
//! returns `Ok` (the orderly, cancellation-driven exit) is done.
//!
//! The broker is the one exception: rumqttd has no stop handle and owns its
//! listener lifecycle, so it runs fire-and-forget on a detached OS thread,
//! outside both the runtime and the graceful wait set. The process exits
//! after the cancellable services have drained.

use crate::backup::BackupScheduler;
use crate::codec::ReadingCodec;
use crate::config::TelemetryConfig;
use crate::mqtt::{subscriber, DevicePublisher, MessageBroker, SensorSimulator};
use crate::storage::SensorStore;
use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Delay between starting the broker and dialing in the first client.
const BROKER_GRACE: Duration = Duration::from_millis(500);

/// Exponential backoff for restarting a failed service.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// A run at least this long resets the backoff to `initial_delay`.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

/// Runs `factory`-built service instances until one finishes cleanly or
/// shutdown is requested, backing off between failures.
async fn supervise<F, Fut>(
    name: &'static str,
    token: CancellationToken,
    policy: RestartPolicy,
    mut factory: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut delay = policy.initial_delay;
    loop {
        let started = Instant::now();
        match factory().await {
            Ok(()) => {
                info!("{} service finished", name);
                return;
            }
            Err(e) => {
                if token.is_cancelled() {
                    info!("{} service stopped during shutdown", name);
                    return;
                }
                if started.elapsed() >= policy.stable_after {
                    delay = policy.initial_delay;
                }
                error!("{} service failed: {:#}; restarting in {:?}", name, e, delay);
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("{} service stopped", name);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = policy.next_delay(delay);
            }
        }
    }
}

/// Handle over the supervised pipeline tasks.
pub struct Supervisor {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    /// Spawns the whole pipeline. The returned supervisor owns the
    /// cancellable tasks; cancel the token, then [`wait`](Self::wait) for
    /// them to drain.
    pub async fn start(
        config: TelemetryConfig,
        store: SensorStore,
        codec: ReadingCodec,
        token: CancellationToken,
    ) -> Self {
        let mut supervisor = Self { tasks: Vec::new() };

        match MessageBroker::spawn(&config.broker) {
            // The broker thread ends with the process, not with shutdown;
            // its handle is deliberately not part of the wait set.
            Ok(handle) => drop(handle),
            Err(e) => error!("message broker not started: {}", e),
        }
        tokio::time::sleep(BROKER_GRACE).await;

        // Ingestor before publisher, so the first published reading already
        // has a subscriber.
        {
            let channel = config.channel.clone();
            let run_codec = codec.clone();
            let run_store = store.clone();
            let run_token = token.clone();
            supervisor.spawn_service("ingestor", token.clone(), move || {
                let channel = channel.clone();
                let codec = run_codec.clone();
                let store = run_store.clone();
                let token = run_token.clone();
                async move {
                    subscriber::run(channel, codec, store, token)
                        .await
                        .map_err(color_eyre::Report::from)
                }
            });
        }

        {
            let channel = config.channel.clone();
            let simulator = SensorSimulator::new(&config.simulator);
            let interval = config.simulator.publish_interval();
            let run_codec = codec.clone();
            let run_token = token.clone();
            supervisor.spawn_service("publisher", token.clone(), move || {
                let publisher = DevicePublisher::new(
                    channel.clone(),
                    simulator.clone(),
                    run_codec.clone(),
                    interval,
                );
                let token = run_token.clone();
                async move { publisher.run(token).await.map_err(color_eyre::Report::from) }
            });
        }

        {
            let run_store = store.clone();
            let settings = config.backup.clone();
            let run_token = token.clone();
            supervisor.spawn_service("backup", token.clone(), move || {
                let scheduler = BackupScheduler::new(run_store.clone(), settings.clone());
                let token = run_token.clone();
                async move { scheduler.run(token).await.map_err(color_eyre::Report::from) }
            });
        }

        info!("pipeline services started");
        supervisor
    }

    fn spawn_service<F, Fut>(&mut self, name: &'static str, token: CancellationToken, factory: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(supervise(name, token, RestartPolicy::default(), factory));
        self.tasks.push((name, handle));
    }

    /// Waits for every supervised task to end. Call after cancelling the
    /// shared token.
    pub async fn wait(self) {
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!("{} task join failed: {}", name, e);
            }
        }
    }
}
