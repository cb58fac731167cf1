//! Running many independent trials on a bounded worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Semaphore};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, error, info};

use crate::{
    background::{Background, Census},
    engine::{Engine, StopReason},
    error::SimResult,
    persistence::AnimalRecord,
    report::ReportSink,
    time::SimTime,
};

/// One trial ready to run.
pub struct Trial {
    pub engine: Engine,
    pub background: Background,
}

/// Builds the trial with the given index. Everything random in a trial
/// must be derived from the index so trials reproduce in any batch.
pub trait TrialFactory: Send + Sync + 'static {
    fn build(&self, trial: u64, sink: Arc<dyn ReportSink>) -> SimResult<Trial>;
}

impl<F> TrialFactory for F
where
    F: Fn(u64, Arc<dyn ReportSink>) -> SimResult<Trial> + Send + Sync + 'static,
{
    fn build(&self, trial: u64, sink: Arc<dyn ReportSink>) -> SimResult<Trial> {
        self(trial, sink)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trial: u64,
    pub stop_reason: StopReason,
    pub weeks_run: u64,
    pub final_time: SimTime,
    pub census: Census,
    /// Final live population in list order, when the batch captures it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<Vec<AnimalRecord>>,
}

/// Every trial ends in exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrialOutcome {
    Completed(TrialSummary),
    Aborted { trial: u64, weeks_run: u64 },
    Error { trial: u64, detail: String },
}

impl TrialOutcome {
    pub fn trial(&self) -> u64 {
        match self {
            TrialOutcome::Completed(summary) => summary.trial,
            TrialOutcome::Aborted { trial, .. } | TrialOutcome::Error { trial, .. } => *trial,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TrialOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrialEvent {
    Started {
        trial: u64,
    },
    Progress {
        trial: u64,
        time: SimTime,
        live: usize,
        infectious: usize,
    },
    Finished {
        outcome: TrialOutcome,
    },
}

fn default_progress_interval_weeks() -> u64 {
    13
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    pub trials: u64,
    pub threads: usize,
    #[serde(default = "default_progress_interval_weeks")]
    pub progress_interval_weeks: u64,
    #[serde(default)]
    pub capture_population: bool,
}

impl BatchSettings {
    pub fn new(trials: u64, threads: usize) -> Self {
        Self {
            trials,
            threads,
            progress_interval_weeks: default_progress_interval_weeks(),
            capture_population: false,
        }
    }
}

pub struct BatchRunner {
    factory: Arc<dyn TrialFactory>,
    settings: BatchSettings,
    sink: Arc<dyn ReportSink>,
    cancel: Arc<AtomicBool>,
    events: broadcast::Sender<TrialEvent>,
}

impl BatchRunner {
    pub fn new(
        factory: impl TrialFactory,
        settings: BatchSettings,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(512);
        Self {
            factory: Arc::new(factory),
            settings,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Shared flag; raising it stops every running trial at its next week
    /// boundary and aborts trials still waiting for a worker.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Events from every trial. Slow subscribers skip what they missed.
    pub fn subscribe(&self) -> impl Stream<Item = TrialEvent> + Unpin + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok())
    }

    /// Run trials `0..trials`.
    pub async fn run(&self) -> Vec<TrialOutcome> {
        self.run_trials(0..self.settings.trials).await
    }

    /// Run the given trial indices, at most `threads` at a time. Outcomes
    /// are returned in the order the indices were given.
    pub async fn run_trials(&self, trials: impl IntoIterator<Item = u64>) -> Vec<TrialOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.settings.threads.max(1)));
        let mut handles = Vec::new();
        for trial in trials {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    handles.push((trial, Err(err.to_string())));
                    continue;
                }
            };
            let worker = self.worker();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                worker.execute(trial)
            });
            handles.push((trial, Ok(handle)));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (trial, handle) in handles {
            let outcome = match handle {
                Ok(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => self.worker().finish(TrialOutcome::Error {
                        trial,
                        detail: format!("worker failed: {err}"),
                    }),
                },
                Err(detail) => self.worker().finish(TrialOutcome::Error { trial, detail }),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Run one trial on the calling thread.
    pub fn run_blocking(&self, trial: u64) -> TrialOutcome {
        self.worker().execute(trial)
    }

    fn worker(&self) -> Worker {
        Worker {
            factory: Arc::clone(&self.factory),
            sink: Arc::clone(&self.sink),
            cancel: Arc::clone(&self.cancel),
            events: self.events.clone(),
            progress_interval_weeks: self.settings.progress_interval_weeks,
            capture_population: self.settings.capture_population,
        }
    }
}

struct Worker {
    factory: Arc<dyn TrialFactory>,
    sink: Arc<dyn ReportSink>,
    cancel: Arc<AtomicBool>,
    events: broadcast::Sender<TrialEvent>,
    progress_interval_weeks: u64,
    capture_population: bool,
}

impl Worker {
    fn execute(&self, trial: u64) -> TrialOutcome {
        // Sending fails only when nobody is subscribed.
        let _ = self.events.send(TrialEvent::Started { trial });
        if self.cancel.load(Ordering::SeqCst) {
            return self.finish(TrialOutcome::Aborted {
                trial,
                weeks_run: 0,
            });
        }

        let Trial {
            mut engine,
            mut background,
        } = match self.factory.build(trial, Arc::clone(&self.sink)) {
            Ok(built) => built,
            Err(err) => {
                return self.finish(TrialOutcome::Error {
                    trial,
                    detail: err.to_string(),
                })
            }
        };

        let mut weeks = 0u64;
        let interval = self.progress_interval_weeks;
        let result = engine.run_with_hook(&mut background, &self.cancel, |summary| {
            weeks += 1;
            if interval > 0 && weeks % interval == 0 {
                let _ = self.events.send(TrialEvent::Progress {
                    trial,
                    time: summary.time,
                    live: summary.census.live,
                    infectious: summary.census.infectious,
                });
            }
        });

        let outcome = match result {
            Ok(run) if run.stop_reason == StopReason::Cancelled => TrialOutcome::Aborted {
                trial,
                weeks_run: run.weeks_run,
            },
            Ok(run) => TrialOutcome::Completed(TrialSummary {
                trial,
                stop_reason: run.stop_reason,
                weeks_run: run.weeks_run,
                final_time: run.final_time,
                census: run.census,
                population: self.capture_population.then(|| {
                    background
                        .animals()
                        .iter()
                        .enumerate()
                        .map(|(index, animal)| AnimalRecord::capture(animal, index))
                        .collect()
                }),
            }),
            Err(err) => TrialOutcome::Error {
                trial,
                detail: err.to_string(),
            },
        };
        self.finish(outcome)
    }

    fn finish(&self, outcome: TrialOutcome) -> TrialOutcome {
        match &outcome {
            TrialOutcome::Completed(summary) => {
                info!(trial = summary.trial, reason = ?summary.stop_reason, "trial completed");
                self.sink.progress(
                    summary.trial,
                    &format!(
                        "completed after {} weeks ({:?}), {} live",
                        summary.weeks_run, summary.stop_reason, summary.census.live
                    ),
                );
            }
            TrialOutcome::Aborted { trial, weeks_run } => {
                debug!(trial, weeks_run, "trial aborted");
                self.sink
                    .progress(*trial, &format!("aborted after {weeks_run} weeks"));
            }
            TrialOutcome::Error { trial, detail } => {
                error!(trial, %detail, "trial failed");
                self.sink.error(Some(*trial), detail);
            }
        }
        let _ = self.events.send(TrialEvent::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }
}
