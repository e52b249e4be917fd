//! Long-lived service lifetime controller (§7), modeled directly on the
//! orchestration daemon this engine is a replacement for: a single async
//! main loop plus one genuine OS thread dedicated to health checks, woken by
//! an explicit quit signal rather than polled.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// Static configuration for a [`ServiceController`] run.
#[derive(Debug, Clone)]
pub struct ServiceConfiguration {
    /// Keep calling `on_iteration` forever (subject to `can_shutdown`) rather
    /// than stopping after the first pass.
    pub as_service: bool,
    /// Delay between iterations. Zero means no delay at all (back-to-back
    /// iterations).
    pub loop_delay: Duration,
    /// How often the health-check thread wakes up on its own, absent a quit
    /// signal. A configured `0` is floored to 50ms rather than treated as
    /// "never sleep" — a zero-duration `recv_timeout` loop would spin the
    /// health-check thread at 100% CPU for no observable benefit.
    pub health_check_frequency: Duration,
    pub name: String,
}

impl ServiceConfiguration {
    pub fn one_shot(name: impl Into<String>) -> Self {
        Self {
            as_service: false,
            loop_delay: Duration::ZERO,
            health_check_frequency: Duration::from_millis(50),
            name: name.into(),
        }
    }

    pub fn daemon(name: impl Into<String>, loop_delay: Duration, health_check_frequency: Duration) -> Self {
        let floor = Duration::from_millis(50);
        Self {
            as_service: true,
            loop_delay,
            health_check_frequency: health_check_frequency.max(floor),
            name: name.into(),
        }
    }
}

/// The behavior a concrete service plugs into the controller loop.
///
/// Only `on_iteration` and `can_shutdown` are required; the rest are hooks
/// with no-op defaults, mirroring the optional overrides on the reference
/// service base class.
#[async_trait]
pub trait Service: Send {
    type Error: std::fmt::Display + Send;

    /// Do one unit of work. A returned error stops the loop after this
    /// iteration; it is logged but never panics the controller.
    async fn on_iteration(&mut self) -> Result<(), Self::Error>;

    /// Whether the loop should stop after the current iteration, independent
    /// of `as_service`.
    fn can_shutdown(&self) -> bool {
        false
    }

    /// Called once before the loop starts. An error here aborts the run
    /// before a single iteration executes.
    async fn on_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called after the loop has stopped, for any reason. Errors are logged,
    /// never propagated — shutdown must not fail.
    async fn on_shutdown(&mut self) {}

    /// Called after each successful iteration.
    async fn on_iteration_complete(&mut self) {}

    /// Called from the dedicated health-check thread on its own cadence.
    /// Runs independently of the main loop, so implementations must not
    /// assume exclusive access to state the main loop is also touching.
    fn on_health_check(&self) {}

    /// Called just before the inter-iteration sleep, when `loop_delay` is
    /// non-zero.
    async fn on_delay(&mut self) {}
}

enum HealthSignal {
    Quit,
}

/// Drives a [`Service`] through its configured lifetime: optional health
/// checks on a background thread, then a main loop that runs until the
/// service says it's done, a single pass completes (`!as_service`), or
/// `on_iteration` errors.
pub struct ServiceController<S: Service> {
    // Shared with the health-check thread, which needs to call
    // `on_health_check` concurrently with the main loop's `on_iteration`.
    // `tokio::sync::Mutex` rather than `std::sync::Mutex`: the main loop
    // holds the guard across `.await` points (an iteration's own awaits),
    // which is exactly what tokio's mutex is built for; the health thread,
    // a genuine OS thread with no runtime of its own, takes the same lock
    // via `blocking_lock`.
    service: Arc<Mutex<S>>,
    config: ServiceConfiguration,
}

impl<S: Service> ServiceController<S> {
    pub fn new(service: S, config: ServiceConfiguration) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            config,
        }
    }

    pub async fn execute(self) -> S {
        let (health_tx, health_handle) = self.start_health_check();

        if let Err(err) = self.service.lock().await.on_start().await {
            error!(service = %self.config.name, error = %err, "on_start failed; aborting before first iteration");
            self.stop_health_check(health_tx, health_handle);
            self.service.lock().await.on_shutdown().await;
            return self.into_inner();
        }

        let mut running = true;
        while running {
            match self.service.lock().await.on_iteration().await {
                Ok(()) => self.service.lock().await.on_iteration_complete().await,
                Err(err) => {
                    error!(service = %self.config.name, error = %err, "iteration failed; stopping");
                    running = false;
                }
            }

            if !self.config.as_service {
                running = false;
            }
            if self.service.lock().await.can_shutdown() {
                running = false;
            }

            if running && !self.config.loop_delay.is_zero() {
                self.service.lock().await.on_delay().await;
                tokio::time::sleep(self.config.loop_delay).await;
            }
        }

        self.stop_health_check(health_tx, health_handle);
        self.service.lock().await.on_shutdown().await;
        self.into_inner()
    }

    /// Unwrap the shared service back out once the health-check thread has
    /// been joined (and its `Arc` clone dropped), restoring single ownership.
    fn into_inner(self) -> S {
        Arc::try_unwrap(self.service)
            .unwrap_or_else(|_| panic!("health-check thread still holds the service after being joined"))
            .into_inner()
    }

    fn start_health_check(&self) -> (std_mpsc::Sender<HealthSignal>, Option<JoinHandle<()>>)
    where
        S: 'static,
    {
        let (tx, rx) = std_mpsc::channel::<HealthSignal>();
        let frequency = self.config.health_check_frequency;
        let name = self.config.name.clone();
        let service = self.service.clone();

        // A dedicated OS thread, woken early by `Quit` rather than polled,
        // mirroring the reference controller's threading model. On every
        // wakeup that isn't a quit signal, it takes its turn on the shared
        // lock and actually runs the probe — `blocking_lock` is the
        // synchronous counterpart to the main loop's `.lock().await`, safe
        // to call here because this thread has no tokio runtime of its own.
        let handle = std::thread::Builder::new()
            .name(format!("{name}-healthcheck"))
            .spawn(move || loop {
                match rx.recv_timeout(frequency) {
                    Ok(HealthSignal::Quit) => break,
                    Err(std_mpsc::RecvTimeoutError::Timeout) => {
                        service.blocking_lock().on_health_check();
                    }
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })
            .ok();

        (tx, handle)
    }

    fn stop_health_check(&self, tx: std_mpsc::Sender<HealthSignal>, handle: Option<JoinHandle<()>>) {
        let _ = tx.send(HealthSignal::Quit);
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(service = %self.config.name, "health-check thread panicked");
            }
        }
    }
}

/// Elapsed-time helper for services that want to run `on_health_check`-style
/// work inline on the main loop's own cadence instead of (or alongside) the
/// background thread — e.g. logging "still alive" every N seconds without
/// contending for the service lock from a second thread at all.
pub struct HealthClock {
    last: Instant,
    frequency: Duration,
}

impl HealthClock {
    pub fn new(frequency: Duration) -> Self {
        Self {
            last: Instant::now(),
            frequency: frequency.max(Duration::from_millis(50)),
        }
    }

    /// True once `frequency` has elapsed since the last time this returned
    /// true; resets the clock as a side effect.
    pub fn due(&mut self) -> bool {
        if self.last.elapsed() >= self.frequency {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}
