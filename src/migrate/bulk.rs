//! Bounded worker pool for per-change passes.

use crossbeam::channel;

use crate::core::ChangeKey;

use super::error::MigrationError;
use super::options::CancelToken;
use super::report::{BulkReport, ChangeOutcome};

/// Run `work` over `keys` on up to `threads` workers.
///
/// Each worker builds its own state with `init` since store handles are not
/// shared between threads. Failures are recorded and never stop the pass;
/// cancellation is checked before each change.
pub(crate) fn run_bulk<W, I, F>(
    keys: Vec<ChangeKey>,
    threads: usize,
    cancel: &CancelToken,
    init: I,
    work: F,
) -> BulkReport
where
    I: Fn() -> Result<W, MigrationError> + Sync,
    F: Fn(&W, &ChangeKey) -> Result<ChangeOutcome, MigrationError> + Sync,
{
    let threads = threads.clamp(1, keys.len().max(1));
    let (work_tx, work_rx) = channel::bounded::<ChangeKey>(threads * 2);
    let (done_tx, done_rx) = channel::unbounded::<(ChangeKey, Result<ChangeOutcome, String>)>();
    let total = keys.len();

    std::thread::scope(|scope| {
        for worker in 0..threads {
            let rx = work_rx.clone();
            let tx = done_tx.clone();
            let init = &init;
            let work = &work;
            scope.spawn(move || {
                let _span = tracing::debug_span!("bulk_worker", worker).entered();
                let state = init();
                if let Err(err) = &state {
                    tracing::error!(worker, error = %err, "worker failed to open stores");
                }
                for key in rx.iter() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = match &state {
                        Ok(state) => work(state, &key).map_err(|err| err.to_string()),
                        Err(err) => Err(err.to_string()),
                    };
                    if tx.send((key, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(work_rx);
        drop(done_tx);

        for key in keys {
            if cancel.is_cancelled() {
                tracing::info!("bulk pass cancelled");
                break;
            }
            if work_tx.send(key).is_err() {
                break;
            }
        }
        drop(work_tx);
    });

    let mut report = BulkReport::default();
    for (key, outcome) in done_rx.iter() {
        report.attempted += 1;
        match outcome {
            Ok(ChangeOutcome::UpToDate | ChangeOutcome::Empty) => report.skipped += 1,
            Ok(outcome) => {
                report.succeeded += 1;
                report.ref_updates += outcome.ref_updates();
            }
            Err(reason) => {
                tracing::warn!(
                    repo = %key.repo,
                    change = %key.id,
                    error = %reason,
                    "change migration failed"
                );
                report.failed.push((key.repo, key.id, reason));
            }
        }
    }
    report.failed.sort();
    report.cancelled = cancel.is_cancelled() && report.attempted < total;
    tracing::info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed.len(),
        cancelled = report.cancelled,
        "bulk pass finished"
    );
    report
}
