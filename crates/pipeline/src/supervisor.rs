//! Races a cancellation token against one blocking engine call.

use lunet_engine::Engine;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Reason attached to interrupts issued by the supervisor.
///
/// Diagnostic only: cancellation detection relies on the engine's typed
/// interrupt outcome and the token state, never on this string.
pub const CANCELLATION_REASON: &str = "evaluation cancelled";

/// Run one unit of (potentially blocking) engine work under `cancel`.
///
/// Protocol:
///
/// 1. A watcher task is spawned and signals readiness; the unit does not
///    start until readiness is observed. The token wait is level-triggered,
///    so a token that fired before entry is still seen.
/// 2. A token already cancelled at entry short-circuits to
///    [`PipelineError::Cancelled`] without running the unit at all.
/// 3. If the token fires while the unit runs, the watcher interrupts the
///    engine; the resulting typed interrupt error is normalized to
///    [`PipelineError::Cancelled`].
/// 4. When the unit returns, the watcher is signalled and awaited on every
///    exit path, and any stale interrupt request is cleared.
///
/// If the token has fired, the result is `Cancelled` even when the unit
/// completed successfully or failed for an unrelated reason.
///
/// Only one unit may be supervised per engine at a time: an interrupt
/// targets the whole runtime, not a specific call, so nesting supervisors
/// over one engine would let two parties race to interrupt it. The unit runs
/// via [`tokio::task::block_in_place`], so this function requires a
/// multi-thread tokio runtime.
pub async fn supervised<T, F>(
    engine: &Engine,
    cancel: &CancellationToken,
    unit: F,
) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError>,
{
    let interrupt = engine.interrupt_handle();
    let (ready_tx, ready_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let watched = cancel.clone();

    let watcher = tokio::spawn(async move {
        let _ = ready_tx.send(());
        tokio::select! {
            _ = watched.cancelled() => {
                interrupt.interrupt(CANCELLATION_REASON);
            }
            _ = done_rx => {}
        }
    });

    // Do not start executing until the watcher is running; otherwise the
    // unit could finish before anyone was watching the token.
    let _ = ready_rx.await;

    if cancel.is_cancelled() {
        let _ = done_tx.send(());
        let _ = watcher.await;
        // The watcher may have interrupted the engine before exiting; do not
        // let that leak into a later execution.
        engine.clear_interrupt();
        return Err(PipelineError::Cancelled);
    }

    let result = tokio::task::block_in_place(unit);

    let _ = done_tx.send(());
    let _ = watcher.await;

    if cancel.is_cancelled() {
        engine.clear_interrupt();
        return Err(PipelineError::Cancelled);
    }
    match result {
        Err(err) if err.is_interrupted() => Err(PipelineError::Cancelled),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn pre_fired_token_runs_nothing() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = supervised(&engine, &cancel, || {
            engine.exec("mutate", "flag = true").map_err(Into::into)
        })
        .await;
        assert_matches!(result, Err(PipelineError::Cancelled));

        // Zero side effects: the unit never reached the engine.
        let flag = engine
            .eval_json("check", "return flag == nil")
            .expect("eval");
        assert_eq!(flag, json!(true));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_during_execution_is_normalized() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = supervised(&engine, &cancel, || {
            engine
                .eval_json("spin", "while true do end")
                .map_err(Into::into)
        })
        .await;
        assert_matches!(result, Err(PipelineError::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_unit_passes_through() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();

        let result = supervised(&engine, &cancel, || {
            engine.eval_json("sum", "return 1 + 1").map_err(Into::into)
        })
        .await
        .expect("supervised");
        assert_eq!(result, json!(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unrelated_failure_is_not_cancellation() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();

        let result = supervised(&engine, &cancel, || {
            engine
                .eval_json("nilcall", "local f = nil; return f()")
                .map_err(Into::into)
        })
        .await;
        assert_matches!(
            result,
            Err(PipelineError::Engine(
                lunet_engine::EngineError::Execution(_)
            ))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn engine_is_reusable_after_cancellation() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = supervised(&engine, &cancel, || {
            engine.exec("mutate", "flag = true").map_err(Into::into)
        })
        .await;
        assert_matches!(result, Err(PipelineError::Cancelled));

        // A fresh, non-cancelled run on the same engine must not be aborted
        // by a stale interrupt.
        let fresh = CancellationToken::new();
        let value = supervised(&engine, &fresh, || {
            engine
                .eval_json("spin", "for i = 1, 100000 do end return 7")
                .map_err(Into::into)
        })
        .await
        .expect("supervised");
        assert_eq!(value, json!(7));
    }
}
