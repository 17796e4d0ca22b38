//! llama.cpp-backed engine adapter.
//!
//! Thin translation onto `llama-cpp-2`: every trait method maps to one
//! library call and propagates its error verbatim. Since `LlamaContext`
//! borrows its model, the context handle bundles an `Arc<LlamaModel>` with
//! a lifetime-erased context; field order keeps the context dropped first.

use std::num::NonZeroU32;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use super::{gguf, EngineError, InferenceEngine, Logits, TokenId};
use crate::config::{ModelConfig, SamplingParams};

const BATCH_CAPACITY: usize = 512;

/// Engine adapter owning the process-wide llama.cpp backend. Create one
/// per process.
pub struct LlamaEngine {
    backend: LlamaBackend,
}

impl LlamaEngine {
    pub fn init() -> Result<Self, EngineError> {
        let backend = LlamaBackend::init().map_err(|e| EngineError::Backend(e.to_string()))?;
        tracing::info!("llama.cpp backend initialized");
        Ok(Self { backend })
    }
}

/// Context handle: the llama context, the batch it decodes through, and
/// the sampler chain for the current sampling parameters.
pub struct LlamaSession {
    // Dropped before `model`, which keeps the erased borrow below sound.
    context: LlamaContext<'static>,
    batch: LlamaBatch,
    sampler: Option<(SamplerKey, LlamaSampler)>,
    model: Arc<LlamaModel>,
}

#[derive(Debug, Clone, PartialEq)]
struct SamplerKey {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    seed: u32,
}

impl From<&SamplingParams> for SamplerKey {
    fn from(s: &SamplingParams) -> Self {
        Self {
            temperature: s.temperature,
            top_p: s.top_p,
            top_k: s.top_k,
            repeat_penalty: s.repeat_penalty,
            seed: s.seed,
        }
    }
}

impl InferenceEngine for LlamaEngine {
    type Model = Arc<LlamaModel>;
    type Context = LlamaSession;

    fn load_model(&self, config: &ModelConfig) -> Result<Arc<LlamaModel>, EngineError> {
        // Cheap header check first, for a precise error on bad files.
        let header =
            gguf::read_header(&config.path).map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        tracing::debug!(
            version = header.version,
            tensors = header.tensor_count,
            "gguf header ok"
        );

        if !config.use_mmap {
            // llama-cpp-2 does not expose the mmap toggle; mapping stays on.
            tracing::warn!("use_mmap=false is not supported by this backend, ignoring");
        }

        let params = LlamaModelParams::default()
            .with_n_gpu_layers(config.gpu_layers)
            .with_use_mlock(config.use_mlock);

        let model = LlamaModel::load_from_file(&self.backend, &config.path, &params)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        tracing::info!(
            path = %config.path.display(),
            vocab = model.n_vocab(),
            train_ctx = model.n_ctx_train(),
            params = model.n_params(),
            "model loaded from file"
        );
        Ok(Arc::new(model))
    }

    fn create_context(
        &self,
        model: &Arc<LlamaModel>,
        config: &ModelConfig,
    ) -> Result<LlamaSession, EngineError> {
        let n_ctx = NonZeroU32::new(config.context_size)
            .ok_or_else(|| EngineError::ContextCreate("context_size must be positive".into()))?;

        let params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(BATCH_CAPACITY as u32)
            .with_n_threads(config.thread_count as i32)
            .with_n_threads_batch(config.thread_count as i32);

        let model = model.clone();
        let context = model
            .new_context(&self.backend, params)
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;
        // The context borrows the model behind the Arc. The Arc lives in
        // the session and, by field order, outlives the context, so
        // erasing the borrow is sound.
        let context =
            unsafe { std::mem::transmute::<LlamaContext<'_>, LlamaContext<'static>>(context) };

        Ok(LlamaSession {
            context,
            batch: LlamaBatch::new(BATCH_CAPACITY, 1),
            sampler: None,
            model,
        })
    }

    fn tokenize(&self, model: &Arc<LlamaModel>, text: &str) -> Result<Vec<TokenId>, EngineError> {
        let tokens = model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| EngineError::Tokenize(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| TokenId(t.0)).collect())
    }

    fn evaluate(
        &self,
        _model: &Arc<LlamaModel>,
        session: &mut LlamaSession,
        tokens: &[TokenId],
        position: u32,
    ) -> Result<Logits, EngineError> {
        if tokens.is_empty() {
            return Err(EngineError::Evaluate("empty token batch".into()));
        }

        session.batch.clear();
        let last = tokens.len() - 1;
        for (i, token) in tokens.iter().enumerate() {
            session
                .batch
                .add(LlamaToken(token.0), position as i32 + i as i32, &[0], i == last)
                .map_err(|e| EngineError::Evaluate(e.to_string()))?;
        }

        session
            .context
            .decode(&mut session.batch)
            .map_err(|e| EngineError::Evaluate(e.to_string()))?;

        Ok(Logits(session.batch.n_tokens() - 1))
    }

    fn sample(
        &self,
        _model: &Arc<LlamaModel>,
        session: &mut LlamaSession,
        logits: Logits,
        sampling: &SamplingParams,
    ) -> Result<TokenId, EngineError> {
        let key = SamplerKey::from(sampling);
        let stale = !matches!(&session.sampler, Some((current, _)) if *current == key);
        if stale {
            session.sampler = Some((key, build_sampler(sampling)));
        }
        let Some((_, sampler)) = session.sampler.as_mut() else {
            return Err(EngineError::Sample("sampler unavailable".into()));
        };

        let token = sampler.sample(&session.context, logits.0);
        sampler.accept(token);
        Ok(TokenId(token.0))
    }

    fn token_to_piece(
        &self,
        model: &Arc<LlamaModel>,
        token: TokenId,
    ) -> Result<Vec<u8>, EngineError> {
        model
            .token_to_bytes(LlamaToken(token.0), Special::Tokenize)
            .map_err(|e| EngineError::Detokenize(e.to_string()))
    }

    fn is_end_of_generation(&self, model: &Arc<LlamaModel>, token: TokenId) -> bool {
        model.is_eog_token(LlamaToken(token.0))
    }

    fn reset_context(&self, session: &mut LlamaSession) {
        session.context.clear_kv_cache();
        session.sampler = None;
    }
}

fn build_sampler(sampling: &SamplingParams) -> LlamaSampler {
    // Greedy for near-zero temperature, otherwise the usual chain.
    if sampling.temperature < 0.01 {
        return LlamaSampler::greedy();
    }

    let seed = if sampling.seed == 0 {
        entropy_seed()
    } else {
        sampling.seed
    };

    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, sampling.repeat_penalty, 0.0, 0.0),
        LlamaSampler::top_k(sampling.top_k as i32),
        LlamaSampler::top_p(sampling.top_p, 1),
        LlamaSampler::temp(sampling.temperature),
        LlamaSampler::dist(seed),
    ])
}

/// Seed from system entropy when the request leaves it at 0.
fn entropy_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
