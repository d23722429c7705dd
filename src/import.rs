use std::collections::HashMap;
use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::ImportConfig;
use crate::cancel::CancellationState;
use crate::error::{ApiError, LedgerError};
use crate::ledger::{Ledger, OutcomeStatus, Report};
use crate::matcher::{CandidateMatch, Matcher};
use crate::music_api::DynMusicApi;
use crate::retry::RateLimitGate;
use crate::source::SourceTrack;
use crate::submit::{BatchSubmitter, Batcher, ResolvedGroup, SubmitStats, record_group};

// full batches waiting for the submitter
const BATCH_QUEUE: usize = 4;

#[derive(Debug)]
pub struct ImportOutcome {
    pub report: Report,
    pub stats: SubmitStats,
    /// Why the run stopped early, if it did.
    pub aborted: Option<String>,
}

/// Indices of plays of the same song, each group in source order and groups
/// ordered by first play.
pub fn group_duplicates(tracks: &[SourceTrack]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for (index, track) in tracks.iter().enumerate() {
        match by_key.get(&track.dedup_key()) {
            Some(&g) => groups[g].push(index),
            None => {
                by_key.insert(track.dedup_key(), groups.len());
                groups.push(vec![index]);
            }
        }
    }
    groups
}

fn unmatched_detail(candidate: &CandidateMatch) -> String {
    if candidate.confidence > 0.0 {
        format!(
            "no catalog match (best candidate scored {:.2})",
            candidate.confidence
        )
    } else {
        "no catalog match".to_string()
    }
}

fn failure_detail(e: &ApiError) -> String {
    match e {
        ApiError::Cancelled(reason) => format!("not matched, run aborted: {reason}"),
        other => format!("catalog search failed: {other}"),
    }
}

/// Match every track against the catalog and like the matches.
///
/// Matching runs up to `concurrency_limit` searches at once; full batches
/// are handed to the submitter as soon as they fill up, in resolution order.
/// A fatal error stops new work, but every track still ends up with an
/// outcome.
pub async fn import(
    tracks: Vec<SourceTrack>,
    api: DynMusicApi,
    config: &ImportConfig,
) -> Result<ImportOutcome, LedgerError> {
    let cancel = CancellationState::new();
    let gate = Arc::new(RateLimitGate::new());
    let policy = config.retry_policy();
    let batch_size = config.batch_size.min(api.max_batch_size()).max(1);
    let concurrency = config.concurrency_limit.max(1);

    let groups = group_duplicates(&tracks);
    let ledger = Ledger::new(tracks);
    info!(
        "matching {} plays ({} distinct songs) against {:?}, {}",
        ledger.len(),
        groups.len(),
        api.api_type(),
        if config.dry_run() { "dry run" } else { "adding to liked songs" }
    );

    let matcher = Matcher::new(
        api.clone(),
        policy.clone(),
        gate.clone(),
        cancel.clone(),
        config.fuzzy_threshold,
        config.search_limit,
    );
    let submitter = BatchSubmitter::new(
        api.clone(),
        &ledger,
        policy,
        gate,
        cancel.clone(),
        config.dry_run(),
    );
    let (tx, rx) = mpsc::channel(BATCH_QUEUE);

    let resolve = async {
        let tx = tx;
        let matcher = &matcher;
        let ledger = &ledger;
        let mut batcher = Batcher::new(batch_size);

        let mut resolved = stream::iter(groups)
            .map(move |members| async move {
                let res = matcher.find_match(&ledger.tracks()[members[0]]).await;
                (members, res)
            })
            .buffer_unordered(concurrency);

        while let Some((members, res)) = resolved.next().await {
            match res {
                Ok(candidate) => match candidate.catalog_track_id.clone() {
                    Some(id) => {
                        let group = ResolvedGroup { members, candidate };
                        if let Some(batch) = batcher.push(id, group) {
                            if tx.send(batch).await.is_err() {
                                error!("submitter stopped before all batches were sent");
                            }
                        }
                    }
                    None => {
                        let track = &candidate.source;
                        warn!("no match for {} - {}", track.artist, track.title);
                        let detail = unmatched_detail(&candidate);
                        record_group(
                            ledger,
                            &members,
                            Some(&candidate),
                            OutcomeStatus::Unmatched,
                            Some(&detail),
                        );
                    }
                },
                Err(e) => {
                    if e.is_fatal() {
                        error!("aborting run: {}", e);
                        cancel.cancel(e.to_string());
                    }
                    let detail = failure_detail(&e);
                    record_group(
                        ledger,
                        &members,
                        None,
                        OutcomeStatus::SubmitFailed,
                        Some(&detail),
                    );
                }
            }
        }

        if let Some(batch) = batcher.flush() {
            if tx.send(batch).await.is_err() {
                error!("submitter stopped before all batches were sent");
            }
        }
    };

    let ((), stats) = tokio::join!(resolve, submitter.run(rx));

    let aborted = cancel.reason();
    let report = ledger.finalize()?;
    info!("import finished: {}", report.summary);

    Ok(ImportOutcome {
        report,
        stats,
        aborted,
    })
}
