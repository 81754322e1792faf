//! Tokio-backed event loops.
//!
//! Each executor is a dedicated OS thread driving a current-thread tokio
//! runtime. Tasks spawned through the runtime handle from any thread run on
//! that one thread, which gives the single-writer confinement sessions rely
//! on.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::executor::{EventExecutor, EventLoops, Task};
use crate::executor_id::set_current_executor_id;

/// An executor backed by a current-thread tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    id: usize,
    handle: Handle,
}

impl EventExecutor for TokioExecutor {
    fn id(&self) -> usize {
        self.id
    }

    fn execute(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }

    fn schedule(&self, delay: Duration, task: Task) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task()
        });
    }
}

/// A group of tokio event loop threads.
///
/// Dropping the group stops every loop and joins its thread; pending tasks
/// are discarded.
pub struct TokioEventLoopGroup {
    loops: Option<EventLoops>,
    shutdown: Vec<oneshot::Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl TokioEventLoopGroup {
    /// Start `threads` event loops sharing a fresh [`SystemClock`].
    pub fn start(threads: usize) -> CoreResult<Self> {
        if threads == 0 {
            return Err(CoreError::EmptyGroup);
        }

        let mut group = Self {
            loops: None,
            shutdown: Vec::with_capacity(threads),
            threads: Vec::with_capacity(threads),
        };
        let mut executors: Vec<Arc<dyn EventExecutor>> = Vec::with_capacity(threads);

        for index in 0..threads {
            let (handle_tx, handle_rx) = mpsc::channel::<Result<Handle, String>>();
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

            let thread = std::thread::Builder::new()
                .name(format!("stampede-loop-{index}"))
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_time()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            let _ = handle_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let _ = handle_tx.send(Ok(runtime.handle().clone()));

                    set_current_executor_id(Some(index));
                    tracing::debug!("Event loop {} started", index);
                    runtime.block_on(async {
                        let _ = shutdown_rx.await;
                    });
                    set_current_executor_id(None);
                    tracing::debug!("Event loop {} stopped", index);
                })
                .map_err(|source| CoreError::ThreadSpawn { index, source })?;

            group.shutdown.push(shutdown_tx);
            group.threads.push(thread);

            let handle = handle_rx
                .recv()
                .map_err(|_| CoreError::RuntimeBuild {
                    index,
                    reason: "executor thread exited during startup".to_string(),
                })?
                .map_err(|reason| CoreError::RuntimeBuild { index, reason })?;

            executors.push(Arc::new(TokioExecutor { id: index, handle }));
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        group.loops = Some(EventLoops::new(executors, clock)?);
        tracing::info!("Started {} event loop(s)", threads);
        Ok(group)
    }

    /// Handle to the executors of this group.
    pub fn loops(&self) -> EventLoops {
        match &self.loops {
            Some(loops) => loops.clone(),
            None => unreachable!("loops are set before the group is returned"),
        }
    }

    /// Stop every event loop and wait for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        for tx in self.shutdown.drain(..) {
            let _ = tx.send(());
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("Event loop thread panicked during shutdown");
            }
        }
    }
}

impl Drop for TokioEventLoopGroup {
    fn drop(&mut self) {
        self.stop();
    }
}
