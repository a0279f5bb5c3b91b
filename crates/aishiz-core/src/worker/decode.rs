use aishiz_abi::batch::Batch;
use aishiz_abi::engine::InferenceEngine;
use tracing::{debug, info, warn};

use super::utils::Utf8Stager;
use super::StopReason;
use crate::gateway::CallbackGateway;
use crate::request::GenerationRequest;
use crate::session::{LoadedEngine, SessionHandle};

/// Token loop. Runs while `generated < max_tokens` and no stop was requested;
/// the flag is polled once per iteration, never mid-decode.
///
/// A decode failure after a token was emitted ends the loop quietly: the
/// caller already has that output and still gets `on_complete`.
pub(super) fn stream<E: InferenceEngine>(
    engine: &E,
    request: &GenerationRequest,
    handle: &SessionHandle,
    gateway: &CallbackGateway,
    loaded: &mut LoadedEngine<E>,
    mut n_past: i32,
    mut batch: Batch,
) -> (u32, StopReason) {
    let id = handle.id();
    let mut generated: u32 = 0;
    let mut stager = Utf8Stager::new();

    let stop = loop {
        if generated >= request.max_tokens {
            break StopReason::MaxTokens;
        }
        if handle.is_cancel_requested() {
            info!(session = %id, generated, "stop requested");
            break StopReason::Cancelled;
        }

        let token = engine.sample_next(&mut loaded.sampler, &mut loaded.context);
        if engine.is_end_of_sequence(&loaded.model, token) {
            debug!(session = %id, %token, "end of sequence");
            break StopReason::EndOfSequence;
        }

        let piece = engine.token_to_piece(&loaded.context, token);
        if let Some(delta) = stager.push(&piece) {
            gateway.emit_token(&delta);
        }

        engine.accept(&mut loaded.sampler, token);

        batch.clear();
        if let Err(e) = batch.push(token, n_past, true) {
            warn!(session = %id, error = %e, "could not queue sampled token");
            break StopReason::DecodeFailed;
        }
        n_past += 1;
        generated += 1;

        if let Err(e) = engine.decode(&mut loaded.context, &batch) {
            warn!(
                session = %id,
                step = generated,
                error = %e,
                "decode failed; ending stream early"
            );
            break StopReason::DecodeFailed;
        }
    };

    if let Some(rest) = stager.flush() {
        gateway.emit_token(&rest);
    }

    (generated, stop)
}
