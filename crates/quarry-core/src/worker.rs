//! Running a hydration batch off the caller's thread.
//!
//! The worker posts every event onto a single-consumer queue. Nothing reaches
//! an observer until the owning thread drains the queue through
//! [`HydrationHandle::pump`] or [`HydrationHandle::wait`], so observers never
//! run concurrently with the caller.

use crate::concurrency::RunGuard;
use crate::hydrator::Hydrator;
use crate::report::{HydrationEvent, HydrationObserver, HydrationReport};
use crate::CoreError;
use quarry_schema::ToolRequest;
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

impl Hydrator {
    /// Start a batch on a worker thread.
    ///
    /// Fails with [`CoreError::AlreadyRunning`] while another batch, threaded
    /// or not, is active on this hydrator.
    pub fn spawn(self: &Arc<Self>, requests: Vec<ToolRequest>) -> Result<HydrationHandle, CoreError> {
        let guard = RunGuard::try_acquire(&self.running).ok_or(CoreError::AlreadyRunning)?;
        let (tx, rx) = mpsc::channel();
        let hydrator = Arc::clone(self);
        let join = std::thread::Builder::new()
            .name("quarry-hydrate".to_owned())
            .spawn(move || {
                let _guard = guard;
                let mut forward = |event: &HydrationEvent| {
                    // The handle may already be gone; the run still completes.
                    let _ = tx.send(event.clone());
                };
                hydrator.run(&requests, &mut forward)
            })?;
        debug!("hydration worker started");
        Ok(HydrationHandle {
            events: rx,
            join: Some(join),
            cancelled: HashSet::new(),
        })
    }
}

/// Owner side of a worker run.
pub struct HydrationHandle {
    events: Receiver<HydrationEvent>,
    join: Option<JoinHandle<Result<HydrationReport, CoreError>>>,
    cancelled: HashSet<ToolRequest>,
}

impl HydrationHandle {
    /// Stop tracking a tool. Its events are dropped and it is left out of the
    /// final report. Work already underway for it is not interrupted.
    pub fn cancel(&mut self, id: &str, version: &str) {
        self.cancelled.insert(ToolRequest::new(id, version));
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Deliver every queued event to `observer` without blocking.
    /// Returns how many were delivered.
    pub fn pump(&mut self, observer: &mut dyn HydrationObserver) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.events.try_recv() {
            if let Some(event) = filter(&self.cancelled, event) {
                observer.on_event(&event);
                delivered += 1;
            }
        }
        delivered
    }

    /// Queued events, already filtered, without an observer.
    pub fn drain(&mut self) -> Vec<HydrationEvent> {
        let mut out = Vec::new();
        self.pump(&mut |event: &HydrationEvent| out.push(event.clone()));
        out
    }

    /// Block until the worker finishes, delivering events as they arrive.
    pub fn wait(
        mut self,
        observer: &mut dyn HydrationObserver,
    ) -> Result<HydrationReport, CoreError> {
        while let Ok(event) = self.events.recv() {
            if let Some(event) = filter(&self.cancelled, event) {
                observer.on_event(&event);
            }
        }
        let join = self.join.take().ok_or(CoreError::WorkerPanicked)?;
        let report = join.join().map_err(|_| CoreError::WorkerPanicked)??;
        Ok(report.without(&self.cancelled))
    }
}

fn filter(cancelled: &HashSet<ToolRequest>, event: HydrationEvent) -> Option<HydrationEvent> {
    match event {
        HydrationEvent::BatchFinished { report } => Some(HydrationEvent::BatchFinished {
            report: report.without(cancelled),
        }),
        other => {
            let dropped = other.request().is_some_and(|r| cancelled.contains(r));
            (!dropped).then_some(other)
        }
    }
}
