use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::Duration,
};

use imagegen_rs_common::{ModelDir, Result, SessionError};
use tracing::{debug, info, warn};

use crate::backends::{Backend, EngineHandle};

type Job = Box<dyn FnOnce(&mut WorkerContext) + Send>;

/// State owned by the worker thread. Nothing else touches the engine.
pub(crate) struct WorkerContext {
    backend: Box<dyn Backend>,
    engine: Option<EngineHandle>,
}

impl WorkerContext {
    /// Bring up a fresh engine, releasing any previous one first.
    pub(crate) fn initialize(&mut self, model_dir: &ModelDir) -> anyhow::Result<()> {
        self.release();
        info!("initializing {} engine from {model_dir}.", self.backend.name());
        let backend = &self.backend;
        let handle = guarded(|| backend.initialize(model_dir.path()))?;
        self.engine = Some(EngineHandle::new(handle, self.backend.name()));
        Ok(())
    }

    pub(crate) fn engine(&mut self) -> Option<&mut EngineHandle> {
        self.engine.as_mut()
    }

    pub(crate) fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Returns whether an engine was released.
    pub(crate) fn release(&mut self) -> bool {
        match self.engine.take() {
            Some(mut engine) => engine.close(),
            None => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Run an engine call, turning a panic into an error.
pub(crate) fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(payload) => anyhow::bail!("engine panicked: {}", panic_message(payload.as_ref())),
    }
}

/// A single background thread which runs submitted jobs one at a time, in submission order.
pub(crate) struct Worker {
    jobs: Sender<Job>,
    thread: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn(backend: Box<dyn Backend>) -> std::io::Result<Self> {
        let (jobs, rx) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name("imagegen-worker".to_string())
            .spawn(move || {
                let mut ctx = WorkerContext {
                    backend,
                    engine: None,
                };
                while let Ok(job) = rx.recv() {
                    job(&mut ctx);
                }
                ctx.release();
                debug!("imagegen worker exiting.");
            })?;
        Ok(Self { jobs, thread })
    }

    pub(crate) fn submit<F>(&self, job: F) -> Result<Operation>
    where
        F: FnOnce(&mut WorkerContext) -> Result<()> + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job: Job = Box::new(move |ctx| {
            // The caller may have dropped its `Operation`.
            let _ = done_tx.send(job(ctx));
        });
        self.jobs
            .send(job)
            .map_err(|_| SessionError::WorkerGone)?;
        Ok(Operation { done: done_rx })
    }

    /// Finish every queued job, release the engine and join the thread.
    pub(crate) fn shutdown(self) {
        let Self { jobs, thread } = self;
        drop(jobs);
        if thread.join().is_err() {
            warn!("imagegen worker panicked.");
        }
    }
}

/// Completion token of one background operation. Dropping it detaches the operation.
#[must_use = "an Operation is the only way to observe the operation's result"]
pub struct Operation {
    done: Receiver<Result<()>>,
}

impl Operation {
    /// Block until the operation finishes.
    pub fn wait(self) -> Result<()> {
        self.done.recv().unwrap_or(Err(SessionError::WorkerGone))
    }

    /// `None` if the operation is still running after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        match self.done.recv_timeout(timeout) {
            Ok(res) => Some(res),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(SessionError::WorkerGone)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::SyntheticBackend;

    #[test]
    fn jobs_run_in_order() {
        let worker = Worker::spawn(Box::new(SyntheticBackend::default())).expect("spawn");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ops = (0..4)
            .map(|i| {
                let seen = seen.clone();
                worker
                    .submit(move |_| {
                        seen.lock().unwrap().push(i);
                        Ok(())
                    })
                    .expect("worker alive")
            })
            .collect::<Vec<_>>();
        for op in ops {
            assert_eq!(op.wait(), Ok(()));
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
        worker.shutdown();
    }

    #[test]
    fn job_result_is_delivered() {
        let worker = Worker::spawn(Box::new(SyntheticBackend::default())).expect("spawn");
        let op = worker
            .submit(|_| Err(SessionError::NotInitialized))
            .expect("worker alive");
        assert_eq!(op.wait(), Err(SessionError::NotInitialized));
        worker.shutdown();
    }

    #[test]
    fn panics_become_errors() {
        let err = guarded::<()>(|| panic!("kaboom")).unwrap_err();
        assert_eq!(err.to_string(), "engine panicked: kaboom");
    }

    #[test]
    fn initialize_and_release() {
        let worker = Worker::spawn(Box::new(SyntheticBackend::default())).expect("spawn");
        let dir = ModelDir::new(std::env::temp_dir());
        let op = worker
            .submit(move |ctx| {
                ctx.initialize(&dir)
                    .map_err(|e| SessionError::capability(&e))?;
                assert!(ctx.has_engine());
                assert!(ctx.release());
                assert!(!ctx.release());
                Ok(())
            })
            .expect("worker alive");
        assert_eq!(op.wait(), Ok(()));
        worker.shutdown();
    }
}
