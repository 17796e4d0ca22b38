//! Cross-thread boundary host.
//!
//! Engine handles (llama.cpp's in particular) are not `Send`, so the model
//! runtime lives on a dedicated worker thread that owns it outright.
//! [`InferenceBridge`] is the Send + Sync surface the platform glue talks
//! to: commands flow over a channel, tokens stream back over a
//! per-generation channel, and `stop_inference` bypasses the (possibly
//! busy) worker through the shared cancellation flag.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::{GenerationRequest, ModelConfig};
use crate::engine::{EngineError, InferenceEngine};
use crate::error::RuntimeError;
use crate::generation::{CancellationFlag, ChannelSink, GenerationController, StreamEvent};
use crate::runtime::{ModelRuntime, RuntimeSnapshot};

/// Marker string returned by [`InferenceBridge::ready`], so hosts can probe
/// that the native side is alive before issuing real calls.
pub const READY_MARKER: &str = "inference bridge ready";

enum Command {
    Load {
        config: ModelConfig,
        reply: Sender<Result<RuntimeSnapshot, RuntimeError>>,
    },
    Unload {
        reply: Sender<Result<(), RuntimeError>>,
    },
    ClearContext,
    Generate {
        request: GenerationRequest,
        events: Sender<StreamEvent>,
    },
    Shutdown,
}

/// Handle over the worker thread that owns the model runtime.
///
/// All operations are callable from any thread. Lifecycle commands are
/// processed in order by the worker, so an `unload_model` issued during a
/// generation waits for the generation to finish rather than racing it.
pub struct InferenceBridge {
    command_tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    cancel: Arc<CancellationFlag>,
    // Cache of the last load/unload result, so state getters do not have
    // to queue behind a long-running generation.
    snapshot: Mutex<RuntimeSnapshot>,
}

impl InferenceBridge {
    /// Spawns the worker thread and constructs the engine on it.
    ///
    /// The factory runs on the worker so engines with thread-affine handles
    /// never cross a thread boundary. A factory failure is reported lazily:
    /// every subsequent operation fails with [`RuntimeError::Worker`].
    pub fn spawn<E, F>(factory: F) -> Self
    where
        E: InferenceEngine + 'static,
        F: FnOnce() -> Result<E, EngineError> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel();
        let cancel = Arc::new(CancellationFlag::new());
        let worker_cancel = cancel.clone();
        let worker = thread::spawn(move || worker_main(command_rx, worker_cancel, factory));
        tracing::info!("bridge worker thread started");
        Self {
            command_tx,
            worker: Some(worker),
            cancel,
            snapshot: Mutex::new(RuntimeSnapshot::default()),
        }
    }

    /// Liveness marker for host-side init probes.
    pub fn ready(&self) -> &'static str {
        READY_MARKER
    }

    /// Loads a model, waiting for the worker to finish the load.
    pub fn load_model(&self, config: ModelConfig) -> Result<(), RuntimeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Command::Load {
            config,
            reply: reply_tx,
        })?;
        let snapshot = recv_reply(&reply_rx)??;
        *self.snapshot.lock().expect("snapshot lock poisoned") = snapshot;
        Ok(())
    }

    /// Unloads the current model. Idempotent.
    pub fn unload_model(&self) -> Result<(), RuntimeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Command::Unload { reply: reply_tx })?;
        recv_reply(&reply_rx)??;
        *self.snapshot.lock().expect("snapshot lock poisoned") = RuntimeSnapshot::default();
        Ok(())
    }

    /// Resets the context without unloading. Fire-and-forget; a no-op when
    /// nothing is loaded.
    pub fn clear_context(&self) {
        let _ = self.command_tx.send(Command::ClearContext);
    }

    /// Starts a generation and returns the event stream for it.
    ///
    /// Tokens arrive as [`StreamEvent::Token`] in index order, followed by
    /// exactly one `Done` or `Error`. Fails fast with `NotLoaded` when no
    /// model is resident.
    pub fn generate(&self, request: GenerationRequest) -> Result<Receiver<StreamEvent>, RuntimeError> {
        if !self.is_loaded() {
            return Err(RuntimeError::NotLoaded);
        }
        let (events_tx, events_rx) = mpsc::channel();
        self.send(Command::Generate {
            request,
            events: events_tx,
        })?;
        Ok(events_rx)
    }

    /// Signals the in-flight generation to stop. Returns immediately; the
    /// loop observes the flag within one token. No-op when idle.
    pub fn stop_inference(&self) {
        tracing::debug!("stop requested");
        self.cancel.set();
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.lock().expect("snapshot lock poisoned").loaded
    }

    /// Path of the loaded model, or empty when none is loaded.
    pub fn model_path(&self) -> String {
        self.snapshot
            .lock()
            .expect("snapshot lock poisoned")
            .model_path
            .clone()
    }

    /// Context size of the loaded model, or 0 when none is loaded.
    pub fn context_size(&self) -> u32 {
        self.snapshot.lock().expect("snapshot lock poisoned").context_size
    }

    /// Thread count of the loaded model, or 0 when none is loaded.
    pub fn threads(&self) -> u32 {
        self.snapshot.lock().expect("snapshot lock poisoned").thread_count
    }

    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.command_tx
            .send(command)
            .map_err(|e| RuntimeError::Worker(e.to_string()))
    }
}

#[cfg(feature = "llama")]
impl InferenceBridge {
    /// Bridge backed by the llama.cpp engine.
    pub fn with_llama() -> Self {
        Self::spawn(crate::engine::llama::LlamaEngine::init)
    }
}

impl Drop for InferenceBridge {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn recv_reply<T>(rx: &Receiver<T>) -> Result<T, RuntimeError> {
    rx.recv().map_err(|e| RuntimeError::Worker(e.to_string()))
}

fn worker_main<E, F>(command_rx: Receiver<Command>, cancel: Arc<CancellationFlag>, factory: F)
where
    E: InferenceEngine + 'static,
    F: FnOnce() -> Result<E, EngineError>,
{
    let state = match factory() {
        Ok(engine) => {
            let runtime = Arc::new(ModelRuntime::new(engine));
            let controller = GenerationController::with_flag(runtime.clone(), cancel);
            Ok((runtime, controller))
        }
        Err(err) => {
            tracing::error!(error = %err, "engine init failed");
            Err(err)
        }
    };

    loop {
        let Ok(command) = command_rx.recv() else {
            tracing::debug!("command channel closed, worker exiting");
            break;
        };
        match &state {
            Ok((runtime, controller)) => match command {
                Command::Load { config, reply } => {
                    let result = runtime.load(config).map(|()| runtime.snapshot());
                    let _ = reply.send(result);
                }
                Command::Unload { reply } => {
                    let _ = reply.send(runtime.unload());
                }
                Command::ClearContext => runtime.clear_context(),
                Command::Generate { request, events } => {
                    let mut sink = ChannelSink::new(events.clone());
                    match controller.generate(&request, &mut sink) {
                        Ok(outcome) => {
                            let _ = events.send(StreamEvent::Done(outcome));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "generation failed");
                            let _ = events.send(StreamEvent::Error(err));
                        }
                    }
                }
                Command::Shutdown => {
                    tracing::info!("worker shutting down");
                    break;
                }
            },
            Err(init_err) => {
                let unavailable = || RuntimeError::Worker(init_err.to_string());
                match command {
                    Command::Load { reply, .. } => {
                        let _ = reply.send(Err(unavailable()));
                    }
                    Command::Unload { reply } => {
                        let _ = reply.send(Err(unavailable()));
                    }
                    Command::Generate { events, .. } => {
                        let _ = events.send(StreamEvent::Error(unavailable()));
                    }
                    Command::ClearContext => {}
                    Command::Shutdown => break,
                }
            }
        }
    }
}
