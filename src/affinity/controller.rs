use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::binding::{MonitorRequest, ProcessBindingState};
use super::events::{EventSink, MonitorEvent};
use super::{AffinityMask, BindingMode, NamePattern, SessionStats, StatsSnapshot, compute_mask};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::platform::SchedulingApi;

/// Lifecycle of the monitoring loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No session was ever started.
    Idle,
    Running,
    /// Stop requested, the in-flight tick has not finished yet.
    Cancelling,
    Stopped,
}

struct Session {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    stats: Arc<SessionStats>,
}

/// Drives affinity and priority enforcement for one process pattern at a time.
pub struct AffinityController {
    api: Arc<dyn SchedulingApi>,
    config: EngineConfig,
    utilization: watch::Sender<Vec<f32>>,
    session: Option<Session>,
}

impl AffinityController {
    pub fn new(api: Arc<dyn SchedulingApi>, config: EngineConfig) -> Self {
        let (utilization, _) = watch::channel(Vec::new());
        Self {
            api,
            config,
            utilization,
            session: None,
        }
    }

    pub fn compute_mask<I>(&self, selected: I) -> AffinityMask
    where
        I: IntoIterator<Item = usize>,
    {
        compute_mask(selected)
    }

    /// Starts a monitoring session, stopping any previous one first.
    ///
    /// The new session runs its first tick only after the previous session has finished, so a
    /// stale mask is never applied after a fresh one. Must be called from inside a tokio
    /// runtime. The returned receiver carries the status and found events of the new session.
    pub fn start_monitoring(&mut self, request: MonitorRequest) -> mpsc::Receiver<MonitorEvent> {
        self.stop_monitoring();
        let previous = self.session.take().map(|s| s.handle);

        let (events, rx) = EventSink::channel(self.config.event_capacity);
        let (stop, stop_rx) = watch::channel(false);
        let stats = Arc::new(SessionStats::new());

        let handle = tokio::spawn(run_session(
            previous,
            Arc::clone(&self.api),
            request,
            stop_rx,
            self.utilization.subscribe(),
            events,
            Arc::clone(&stats),
            self.config.fault_backoff(),
        ));

        self.session = Some(Session {
            stop,
            handle,
            stats,
        });
        rx
    }

    /// Requests cancellation of the running session. Does not wait for the loop to finish.
    pub fn stop_monitoring(&mut self) {
        if let Some(session) = &self.session {
            if !session.handle.is_finished() && !session.stop.send_replace(true) {
                debug!("stop requested");
            }
        }
    }

    /// Stops the session and waits for its in-flight tick to finish.
    pub async fn shutdown(&mut self) {
        self.stop_monitoring();
        if let Some(session) = self.session.as_mut() {
            if !session.handle.is_finished() {
                if let Err(e) = (&mut session.handle).await {
                    error!("monitor task ended abnormally: {e}");
                }
            }
        }
    }

    pub fn state(&self) -> MonitorState {
        match &self.session {
            None => MonitorState::Idle,
            Some(s) if s.handle.is_finished() => MonitorState::Stopped,
            Some(s) if *s.stop.borrow() => MonitorState::Cancelling,
            Some(_) => MonitorState::Running,
        }
    }

    /// Counters of the current or most recent session.
    pub fn statistics(&self) -> Option<StatsSnapshot> {
        self.session.as_ref().map(|s| s.stats.snapshot())
    }

    /// Publishes per-core utilization for [`BindingMode::LoadBalance`], indexed by logical
    /// core.
    pub fn publish_utilization(&self, samples: Vec<f32>) {
        self.utilization.send_replace(samples);
    }

    /// Binds every process matching `pattern` once, without starting a loop.
    ///
    /// Returns `(succeeded, failed)`; processes that exit mid-way count as neither.
    pub fn apply_once(
        &self,
        pattern: &NamePattern,
        mask: AffinityMask,
        sync_threads: bool,
    ) -> Result<(usize, usize), EngineError> {
        let mut request = MonitorRequest::new(pattern.clone(), mask, BindingMode::Static);
        request.sync_threads = sync_threads;

        let mut state = ProcessBindingState::new(request);
        let report = state.tick(
            self.api.as_ref(),
            &[],
            &EventSink::discard(),
            &SessionStats::new(),
        )?;
        info!(
            %pattern,
            %mask,
            applied = report.applied,
            failed = report.failed + report.skipped,
            "one-shot apply finished"
        );
        Ok((report.applied, report.failed + report.skipped))
    }
}

impl Drop for AffinityController {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tick panicked".to_string()
    }
}

async fn run_session(
    previous: Option<JoinHandle<()>>,
    api: Arc<dyn SchedulingApi>,
    request: MonitorRequest,
    mut stop: watch::Receiver<bool>,
    utilization: watch::Receiver<Vec<f32>>,
    events: EventSink,
    stats: Arc<SessionStats>,
    fault_backoff: Duration,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            error!("previous monitor task ended abnormally: {e}");
        }
    }

    let interval = request.mode.effective_interval(request.poll_interval);
    info!(pattern = %request.pattern, mode = ?request.mode, ?interval, "monitoring started");
    events.emit(MonitorEvent::Started {
        pattern: request.pattern.to_string(),
        mode: request.mode,
        interval,
    });

    let mut state = ProcessBindingState::new(request);

    loop {
        if *stop.borrow() {
            break;
        }

        let load = utilization.borrow().clone();
        let worker_api = Arc::clone(&api);
        let worker_events = events.clone();
        let worker_stats = Arc::clone(&stats);

        // The tick owns the state while it runs; it comes back even when the tick panics.
        let joined = tokio::task::spawn_blocking(move || {
            let mut state = state;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                state.tick(worker_api.as_ref(), &load, &worker_events, &worker_stats)
            }));
            (state, outcome)
        })
        .await;

        let (returned, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!("monitor tick could not run: {e}");
                events.emit(MonitorEvent::Fault {
                    error: e.to_string(),
                    backoff: Duration::ZERO,
                });
                break;
            }
        };
        state = returned;

        let fault = match outcome {
            Ok(Ok(report)) => {
                stats.record_tick();
                debug!(?report, "tick finished");
                None
            }
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(EngineError::LoopFault(panic_message(payload))),
        };

        let delay = match fault {
            None => interval,
            Some(err) => {
                stats.record_fault();
                warn!(%err, backoff = ?fault_backoff, "monitor tick failed");
                events.emit(MonitorEvent::Fault {
                    error: err.to_string(),
                    backoff: fault_backoff,
                });
                fault_backoff
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("monitoring stopped");
    events.emit(MonitorEvent::Stopped);
}
