//! Model runtime: single-owner lifecycle for the loaded model and its
//! execution context.
//!
//! At most one model/context pair exists per runtime. All lifecycle
//! transitions go through one `RwLock`: `load` and `unload` take the write
//! lock, snapshots and generations take read locks. A generation therefore
//! pins the handles for its entire duration and teardown can never observe
//! a half-valid state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use serde::Serialize;

use crate::config::ModelConfig;
use crate::engine::InferenceEngine;
use crate::error::RuntimeError;

/// Read-only view of the runtime state. Reports empty/zero values when no
/// model is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeSnapshot {
    pub loaded: bool,
    pub model_path: String,
    pub context_size: u32,
    pub thread_count: u32,
}

/// Mutable per-model execution state: the engine context plus the
/// cumulative token position. The position persists across generate calls
/// until `clear_context`.
pub(crate) struct Session<C> {
    pub context: C,
    pub position: u32,
}

// Field order matters: `session` (holding the context) must drop before
// `model`, since the context's lifetime nests inside the model's.
struct LoadedModel<E: InferenceEngine> {
    session: Mutex<Session<E::Context>>,
    model: E::Model,
    config: ModelConfig,
}

/// Owner of at most one loaded model and its context.
///
/// Explicitly constructed and passed by reference, rather than a process
/// global, so tests can run isolated instances side by side.
pub struct ModelRuntime<E: InferenceEngine> {
    // Declared before `engine`: handles must drop before the backend that
    // issued them.
    slot: RwLock<Option<LoadedModel<E>>>,
    engine: E,
    active_generations: AtomicUsize,
}

impl<E: InferenceEngine> ModelRuntime<E> {
    pub fn new(engine: E) -> Self {
        Self {
            slot: RwLock::new(None),
            engine,
            active_generations: AtomicUsize::new(0),
        }
    }

    /// Loads a model and creates its context.
    ///
    /// Exclusive: concurrent callers serialize on the write lock and at
    /// most one observes success; the rest see `AlreadyLoaded`. On any
    /// failure the state is left exactly as it was (absent).
    pub fn load(&self, config: ModelConfig) -> Result<(), RuntimeError> {
        config.validate()?;

        let mut slot = self.slot.write().expect("runtime lock poisoned");
        if slot.is_some() {
            return Err(RuntimeError::AlreadyLoaded);
        }

        let model = self
            .engine
            .load_model(&config)
            .map_err(RuntimeError::LoadFailure)?;
        let context = self
            .engine
            .create_context(&model, &config)
            .map_err(RuntimeError::LoadFailure)?;

        tracing::info!(
            path = %config.path.display(),
            context_size = config.context_size,
            threads = config.thread_count,
            "model loaded"
        );

        *slot = Some(LoadedModel {
            session: Mutex::new(Session {
                context,
                position: 0,
            }),
            model,
            config,
        });
        Ok(())
    }

    /// Releases the context and model, in that order, and clears the
    /// recorded config. Idempotent when nothing is loaded.
    ///
    /// Policy: fails with `Busy` while a generation holds the handles; the
    /// handles are never torn down underneath an active borrower.
    pub fn unload(&self) -> Result<(), RuntimeError> {
        if self.active_generations.load(Ordering::Acquire) > 0 {
            return Err(RuntimeError::Busy);
        }
        let mut slot = self.slot.write().expect("runtime lock poisoned");
        if let Some(loaded) = slot.take() {
            tracing::info!(path = %loaded.config.path.display(), "model unloaded");
            drop(loaded);
        }
        Ok(())
    }

    /// Resets the context's cache and position without releasing handles.
    /// No-op when nothing is loaded.
    pub fn clear_context(&self) {
        let slot = self.slot.read().expect("runtime lock poisoned");
        if let Some(loaded) = slot.as_ref() {
            let mut session = loaded.session.lock().expect("session lock poisoned");
            self.engine.reset_context(&mut session.context);
            session.position = 0;
            tracing::debug!("context cleared");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().expect("runtime lock poisoned").is_some()
    }

    /// Consistent snapshot of the current state, taken under the lock.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let slot = self.slot.read().expect("runtime lock poisoned");
        match slot.as_ref() {
            Some(loaded) => RuntimeSnapshot {
                loaded: true,
                model_path: loaded.config.path.to_string_lossy().into_owned(),
                context_size: loaded.config.context_size,
                thread_count: loaded.config.thread_count,
            },
            None => RuntimeSnapshot::default(),
        }
    }

    /// Runs `f` with the loaded handles pinned for its whole duration.
    ///
    /// The read guard plus the active-generation counter keep `unload`
    /// from invalidating the handles while `f` runs.
    pub(crate) fn with_session<R>(
        &self,
        f: impl FnOnce(&E, &E::Model, &mut Session<E::Context>) -> R,
    ) -> Result<R, RuntimeError> {
        let slot = self.slot.read().expect("runtime lock poisoned");
        let loaded = slot.as_ref().ok_or(RuntimeError::NotLoaded)?;
        let _guard = GenerationGuard::enter(&self.active_generations);
        let mut session = loaded.session.lock().expect("session lock poisoned");
        Ok(f(&self.engine, &loaded.model, &mut session))
    }
}

struct GenerationGuard<'a>(&'a AtomicUsize);

impl<'a> GenerationGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;

    fn runtime() -> ModelRuntime<MockEngine> {
        ModelRuntime::new(MockEngine::new())
    }

    #[test]
    fn load_then_unload_ends_absent() {
        let rt = runtime();
        rt.load(ModelConfig::new("model.gguf")).unwrap();
        assert!(rt.is_loaded());
        rt.unload().unwrap();
        assert!(!rt.is_loaded());
        assert_eq!(rt.snapshot().model_path, "");
    }

    #[test]
    fn snapshot_reflects_config() {
        let rt = runtime();
        let mut config = ModelConfig::new("model.gguf");
        config.context_size = 4096;
        config.thread_count = 8;
        rt.load(config).unwrap();

        let snap = rt.snapshot();
        assert!(snap.loaded);
        assert_eq!(snap.model_path, "model.gguf");
        assert_eq!(snap.context_size, 4096);
        assert_eq!(snap.thread_count, 8);
    }

    #[test]
    fn double_load_fails_and_preserves_state() {
        let rt = runtime();
        rt.load(ModelConfig::new("first.gguf")).unwrap();
        let err = rt.load(ModelConfig::new("second.gguf")).unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyLoaded));
        assert_eq!(rt.snapshot().model_path, "first.gguf");
    }

    #[test]
    fn unload_is_idempotent() {
        let rt = runtime();
        rt.unload().unwrap();
        rt.unload().unwrap();
        rt.load(ModelConfig::new("model.gguf")).unwrap();
        rt.unload().unwrap();
        rt.unload().unwrap();
        assert!(!rt.is_loaded());
    }

    #[test]
    fn clear_context_when_absent_is_noop() {
        let rt = runtime();
        rt.clear_context();
        rt.clear_context();
        assert!(!rt.is_loaded());
    }

    #[test]
    fn failed_load_leaves_state_absent() {
        let rt = ModelRuntime::new(MockEngine {
            fail_load: true,
            ..MockEngine::new()
        });
        let err = rt.load(ModelConfig::new("missing.gguf")).unwrap_err();
        assert!(matches!(err, RuntimeError::LoadFailure(_)));
        assert!(!rt.is_loaded());
    }

    #[test]
    fn failed_context_creation_leaves_state_absent() {
        let rt = ModelRuntime::new(MockEngine {
            fail_context: true,
            ..MockEngine::new()
        });
        let err = rt.load(ModelConfig::new("model.gguf")).unwrap_err();
        assert!(matches!(err, RuntimeError::LoadFailure(_)));
        assert!(!rt.is_loaded());
    }

    #[test]
    fn invalid_config_rejected_before_engine() {
        let rt = runtime();
        let mut config = ModelConfig::new("model.gguf");
        config.context_size = 0;
        assert!(matches!(
            rt.load(config),
            Err(RuntimeError::InvalidConfig(_))
        ));
        assert!(rt.recorded_events().is_empty());
        assert!(!rt.is_loaded());
    }

    #[test]
    fn context_is_freed_before_model() {
        let rt = runtime();
        rt.load(ModelConfig::new("model.gguf")).unwrap();
        rt.unload().unwrap();

        let events = rt.recorded_events();
        let ctx_free = events.iter().position(|e| e == "free_context").unwrap();
        let model_free = events.iter().position(|e| e == "free_model").unwrap();
        assert!(ctx_free < model_free);
    }

    #[test]
    fn unload_during_generation_fails_busy() {
        let rt = runtime();
        rt.load(ModelConfig::new("model.gguf")).unwrap();
        rt.with_session(|_, _, _| {
            assert!(matches!(rt.unload(), Err(RuntimeError::Busy)));
        })
        .unwrap();
        // Once the generation is done, unload proceeds.
        rt.unload().unwrap();
        assert!(!rt.is_loaded());
    }

    impl ModelRuntime<MockEngine> {
        fn recorded_events(&self) -> Vec<String> {
            self.engine.recorded()
        }
    }
}
