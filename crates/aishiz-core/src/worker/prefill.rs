use aishiz_abi::batch::Batch;
use aishiz_abi::engine::InferenceEngine;
use tracing::{debug, info};

use crate::error::GenerationError;
use crate::request::GenerationRequest;
use crate::session::{LoadedEngine, SessionHandle};

pub(super) enum PromptOutcome {
    /// Prompt decoded; `n_past` is the next free position.
    Ready { n_past: i32, batch: Batch },
    Cancelled,
}

/// Tokenize the prompt and decode it, requesting logits only for the final
/// prompt position. Prompts longer than `n_batch` are decoded in order, one
/// `n_batch`-sized chunk per call; cancellation is honored between chunks.
pub(super) fn process_prompt<E: InferenceEngine>(
    engine: &E,
    request: &GenerationRequest,
    handle: &SessionHandle,
    loaded: &mut LoadedEngine<E>,
) -> Result<PromptOutcome, GenerationError> {
    let id = handle.id();

    let tokens = engine
        .tokenize(&mut loaded.context, &request.prompt)
        .map_err(GenerationError::PromptProcessing)?;
    info!(session = %id, n_tokens = tokens.len(), "prompt tokenized");
    if tokens.is_empty() {
        return Err(GenerationError::EmptyPrompt);
    }

    let chunk_len = (request.context.n_batch as usize).max(1);
    let mut batch = Batch::new(chunk_len);
    let mut n_past: i32 = 0;
    let n_chunks = tokens.len().div_ceil(chunk_len);

    for (i, chunk) in tokens.chunks(chunk_len).enumerate() {
        if i > 0 && handle.is_cancel_requested() {
            info!(session = %id, "stop requested during prompt processing");
            return Ok(PromptOutcome::Cancelled);
        }

        batch.clear();
        for &tok in chunk {
            batch
                .push(tok, n_past, false)
                .map_err(GenerationError::PromptProcessing)?;
            n_past += 1;
        }
        if i + 1 == n_chunks {
            batch.mark_last_for_logits();
        }

        debug!(session = %id, chunk = i, len = chunk.len(), n_past, "decoding prompt chunk");
        engine
            .decode(&mut loaded.context, &batch)
            .map_err(GenerationError::PromptProcessing)?;
    }

    Ok(PromptOutcome::Ready { n_past, batch })
}
