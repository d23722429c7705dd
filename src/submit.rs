use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationState;
use crate::error::ApiError;
use crate::ledger::{Ledger, OutcomeStatus};
use crate::matcher::CandidateMatch;
use crate::music_api::{DynMusicApi, LikeStatus};
use crate::retry::{RateLimitGate, RetryPolicy, retry_with_backoff};

/// Input records sharing one match: the first play of a song and its repeats.
#[derive(Debug, Clone)]
pub struct ResolvedGroup {
    pub members: Vec<usize>,
    pub candidate: CandidateMatch,
}

/// One catalog id and every group that resolved to it.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub catalog_track_id: String,
    pub groups: Vec<ResolvedGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub entries: Vec<BatchEntry>,
}

impl BatchRequest {
    pub fn ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.catalog_track_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|e| &e.groups)
            .map(|g| g.members.len())
            .sum()
    }
}

/// Accumulates resolved groups into batches of at most `max_size` distinct ids,
/// in the order they resolve.
#[derive(Debug)]
pub struct Batcher {
    max_size: usize,
    pending: BatchRequest,
}

impl Batcher {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            pending: BatchRequest::default(),
        }
    }

    /// Returns a batch once it is full.
    pub fn push(&mut self, catalog_track_id: String, group: ResolvedGroup) -> Option<BatchRequest> {
        if let Some(entry) = self
            .pending
            .entries
            .iter_mut()
            .find(|e| e.catalog_track_id == catalog_track_id)
        {
            entry.groups.push(group);
            return None;
        }

        self.pending.entries.push(BatchEntry {
            catalog_track_id,
            groups: vec![group],
        });
        if self.pending.len() >= self.max_size {
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }

    pub fn flush(&mut self) -> Option<BatchRequest> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmitStats {
    /// Batches sent to the like endpoint.
    pub submitted: usize,
    /// Dry-run batches, checked but never sent.
    pub previewed: usize,
    /// Batches dropped because the run was aborted.
    pub skipped: usize,
}

/// Sends batches one at a time and records an outcome for every member.
pub struct BatchSubmitter<'a> {
    api: DynMusicApi,
    ledger: &'a Ledger,
    policy: RetryPolicy,
    gate: Arc<RateLimitGate>,
    cancel: CancellationState,
    dry_run: bool,
}

impl<'a> BatchSubmitter<'a> {
    pub fn new(
        api: DynMusicApi,
        ledger: &'a Ledger,
        policy: RetryPolicy,
        gate: Arc<RateLimitGate>,
        cancel: CancellationState,
        dry_run: bool,
    ) -> Self {
        Self {
            api,
            ledger,
            policy,
            gate,
            cancel,
            dry_run,
        }
    }

    /// Drain the channel until every sender is gone.
    pub async fn run(&self, mut batches: mpsc::Receiver<BatchRequest>) -> SubmitStats {
        let mut stats = SubmitStats::default();
        while let Some(batch) = batches.recv().await {
            self.submit(&batch, &mut stats).await;
        }
        stats
    }

    pub async fn submit(&self, batch: &BatchRequest, stats: &mut SubmitStats) {
        if batch.is_empty() {
            return;
        }
        if self.cancel.is_cancelled() {
            debug!("run aborted, skipping batch of {} tracks", batch.len());
            let e = self.cancel.cancelled_error();
            self.fail_entries(&batch.entries, &e);
            stats.skipped += 1;
            return;
        }

        if self.dry_run {
            self.preview(batch).await;
            stats.previewed += 1;
        } else {
            self.commit(batch).await;
            stats.submitted += 1;
        }
    }

    async fn preview(&self, batch: &BatchRequest) {
        let ids = batch.ids();
        let res = retry_with_backoff(&self.policy, &self.gate, &self.cancel, "check likes", || {
            self.api.check_likes(&ids)
        })
        .await
        .and_then(|liked| {
            if liked.len() == ids.len() {
                Ok(liked)
            } else {
                Err(ApiError::InvalidResponse(format!(
                    "{} liked flags for {} ids",
                    liked.len(),
                    ids.len()
                )))
            }
        });

        match res {
            Ok(liked) => {
                let mut would_add = 0;
                for (entry, liked) in batch.entries.iter().zip(liked) {
                    if liked {
                        self.record_entry(entry, OutcomeStatus::AlreadyPresent, None);
                    } else {
                        would_add += 1;
                        self.record_entry(entry, OutcomeStatus::WouldAdd, None);
                    }
                }
                info!("dry run: would like {} of {} tracks", would_add, batch.len());
            }
            Err(e) if e.is_fatal() || matches!(e, ApiError::Cancelled(_)) => {
                self.fail_entries(&batch.entries, &e);
            }
            Err(e) => {
                warn!("could not check liked songs for {} tracks: {}", batch.len(), e);
                let detail = format!("dry run could not check liked songs: {e}");
                for entry in &batch.entries {
                    self.record_entry(entry, OutcomeStatus::SubmitFailed, Some(&detail));
                }
            }
        }
    }

    async fn commit(&self, batch: &BatchRequest) {
        match self.add_likes(&batch.ids()).await {
            Ok(statuses) => {
                for (entry, status) in batch.entries.iter().zip(&statuses) {
                    self.record_like(entry, status);
                }
                let added = statuses.iter().filter(|s| **s == LikeStatus::Added).count();
                info!("liked {} of {} tracks", added, batch.len());
            }
            Err(ApiError::Rejected { status, message }) if batch.len() > 1 => {
                warn!(
                    "batch of {} tracks rejected ({}: {}), resubmitting one at a time",
                    batch.len(),
                    status,
                    message
                );
                for entry in &batch.entries {
                    match self
                        .add_likes(std::slice::from_ref(&entry.catalog_track_id))
                        .await
                    {
                        Ok(statuses) => self.record_like(entry, &statuses[0]),
                        Err(e) => self.fail_entries(std::slice::from_ref(entry), &e),
                    }
                }
            }
            Err(e) => self.fail_entries(&batch.entries, &e),
        }
    }

    /// One status per id, or an error.
    async fn add_likes(&self, ids: &[String]) -> Result<Vec<LikeStatus>, ApiError> {
        let statuses = retry_with_backoff(&self.policy, &self.gate, &self.cancel, "add likes", || {
            self.api.add_likes(ids)
        })
        .await?;
        if statuses.len() != ids.len() {
            return Err(ApiError::InvalidResponse(format!(
                "{} statuses for {} ids",
                statuses.len(),
                ids.len()
            )));
        }
        Ok(statuses)
    }

    fn record_like(&self, entry: &BatchEntry, status: &LikeStatus) {
        match status {
            LikeStatus::Added => self.record_entry(entry, OutcomeStatus::Added, None),
            LikeStatus::AlreadyPresent => {
                self.record_entry(entry, OutcomeStatus::AlreadyPresent, None)
            }
            LikeStatus::Rejected(reason) => {
                let detail = format!("rejected by the service: {reason}");
                self.record_entry(entry, OutcomeStatus::SubmitFailed, Some(&detail))
            }
        }
    }

    fn fail_entries(&self, entries: &[BatchEntry], e: &ApiError) {
        if e.is_fatal() {
            error!("aborting run: {}", e);
            self.cancel.cancel(e.to_string());
        }
        let detail = match e {
            ApiError::Cancelled(reason) => format!("not submitted, run aborted: {reason}"),
            other => other.to_string(),
        };
        for entry in entries {
            self.record_entry(entry, OutcomeStatus::SubmitFailed, Some(&detail));
        }
    }

    fn record_entry(&self, entry: &BatchEntry, status: OutcomeStatus, detail: Option<&str>) {
        for group in &entry.groups {
            record_group(
                self.ledger,
                &group.members,
                Some(&group.candidate),
                status,
                detail,
            );
        }
    }
}

/// Give every member of a group the same outcome.
pub(crate) fn record_group(
    ledger: &Ledger,
    members: &[usize],
    candidate: Option<&CandidateMatch>,
    status: OutcomeStatus,
    detail: Option<&str>,
) {
    for &index in members {
        let mut outcome = match ledger.outcome(index, status) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("ledger: {}", e);
                continue;
            }
        };
        if let Some(candidate) = candidate {
            outcome = outcome.with_match(candidate);
        }
        if let Some(detail) = detail {
            outcome = outcome.with_detail(detail);
        }
        if let Err(e) = ledger.record(outcome) {
            error!("ledger: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchMethod;
    use crate::source::SourceTrack;

    fn group(index: usize, id: &str) -> ResolvedGroup {
        ResolvedGroup {
            members: vec![index],
            candidate: CandidateMatch {
                source: SourceTrack {
                    artist: "Artist".into(),
                    title: format!("Song {index}"),
                    album: None,
                    played_at: None,
                },
                catalog_track_id: Some(id.into()),
                confidence: 1.0,
                method: MatchMethod::Exact,
            },
        }
    }

    #[test]
    fn batches_fill_to_max_size() {
        let mut batcher = Batcher::new(2);
        assert!(batcher.push("a".into(), group(0, "a")).is_none());
        let full = batcher.push("b".into(), group(1, "b")).unwrap();
        assert_eq!(full.ids(), vec!["a", "b"]);
        assert!(batcher.push("c".into(), group(2, "c")).is_none());
        let rest = batcher.flush().unwrap();
        assert_eq!(rest.ids(), vec!["c"]);
        assert!(batcher.flush().is_none());
    }

    #[test]
    fn same_id_shares_an_entry() {
        let mut batcher = Batcher::new(2);
        assert!(batcher.push("a".into(), group(0, "a")).is_none());
        assert!(batcher.push("a".into(), group(1, "a")).is_none());
        let batch = batcher.flush().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.record_count(), 2);
    }

    #[test]
    fn zero_size_is_clamped() {
        let mut batcher = Batcher::new(0);
        assert!(batcher.push("a".into(), group(0, "a")).is_some());
    }

    #[test]
    fn group_members_share_outcome() {
        let tracks = (0..3)
            .map(|i| SourceTrack {
                artist: "Artist".into(),
                title: format!("Song {i}"),
                album: None,
                played_at: None,
            })
            .collect();
        let ledger = Ledger::new(tracks);
        let g = group(0, "a");
        record_group(
            &ledger,
            &[0, 2],
            Some(&g.candidate),
            OutcomeStatus::Unmatched,
            Some("nothing found"),
        );
        assert_eq!(ledger.pending(), vec![1]);
        assert_eq!(ledger.summary().unmatched, 2);
    }
}
