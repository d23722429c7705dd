use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::LedgerError;
use crate::matcher::{CandidateMatch, MatchMethod};
use crate::source::SourceTrack;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Added,
    /// Dry run: the track would have been added.
    WouldAdd,
    AlreadyPresent,
    Unmatched,
    SubmitFailed,
}

impl OutcomeStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Added | Self::WouldAdd | Self::AlreadyPresent)
    }
}

/// Final status of one input record. Failure entries keep the source fields
/// at top level, so a report can be fed back in as input.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub index: usize,
    #[serde(flatten)]
    pub track: SourceTrack,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_track_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_method: Option<MatchMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl OutcomeRecord {
    pub fn new(index: usize, track: SourceTrack, status: OutcomeStatus) -> Self {
        Self {
            index,
            track,
            status,
            error_detail: None,
            catalog_track_id: None,
            match_method: None,
            confidence: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_match(mut self, candidate: &CandidateMatch) -> Self {
        self.catalog_track_id = candidate.catalog_track_id.clone();
        self.match_method = Some(candidate.method);
        self.confidence = Some(candidate.confidence);
        self
    }
}

/// Counts per status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub added: usize,
    pub would_add: usize,
    pub already_present: usize,
    pub unmatched: usize,
    pub submit_failed: usize,
}

impl Summary {
    fn count(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Added => self.added += 1,
            OutcomeStatus::WouldAdd => self.would_add += 1,
            OutcomeStatus::AlreadyPresent => self.already_present += 1,
            OutcomeStatus::Unmatched => self.unmatched += 1,
            OutcomeStatus::SubmitFailed => self.submit_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.added + self.would_add + self.already_present + self.unmatched + self.submit_failed
    }

    pub fn failures(&self) -> usize {
        self.unmatched + self.submit_failed
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} would add, {} already liked, {} unmatched, {} failed",
            self.added, self.would_add, self.already_present, self.unmatched, self.submit_failed
        )
    }
}

#[derive(Debug)]
pub struct Report {
    /// Non-success outcomes in source order.
    pub failures: Vec<OutcomeRecord>,
    pub summary: Summary,
}

/// One outcome slot per input record. Shared between workers; every write
/// goes through the mutex.
#[derive(Debug)]
pub struct Ledger {
    tracks: Vec<SourceTrack>,
    outcomes: Mutex<Vec<Option<OutcomeRecord>>>,
}

impl Ledger {
    pub fn new(tracks: Vec<SourceTrack>) -> Self {
        let outcomes = Mutex::new(vec![None; tracks.len()]);
        Self { tracks, outcomes }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[SourceTrack] {
        &self.tracks
    }

    /// Start an outcome for record `index`, carrying its source fields.
    pub fn outcome(&self, index: usize, status: OutcomeStatus) -> Result<OutcomeRecord, LedgerError> {
        let track = self
            .tracks
            .get(index)
            .ok_or(LedgerError::UnknownRecord(index))?;
        Ok(OutcomeRecord::new(index, track.clone(), status))
    }

    /// Store the outcome. A record gets exactly one; a second attempt is
    /// refused and the first outcome kept.
    pub fn record(&self, outcome: OutcomeRecord) -> Result<(), LedgerError> {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        let slot = outcomes
            .get_mut(outcome.index)
            .ok_or(LedgerError::UnknownRecord(outcome.index))?;
        if slot.is_some() {
            return Err(LedgerError::DuplicateOutcome(outcome.index));
        }
        *slot = Some(outcome);
        Ok(())
    }

    /// Records still without an outcome.
    pub fn pending(&self) -> Vec<usize> {
        let outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn summary(&self) -> Summary {
        let outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = Summary::default();
        for outcome in outcomes.iter().flatten() {
            summary.count(outcome.status);
        }
        summary
    }

    /// Close the ledger and keep only the failures, in source order.
    pub fn finalize(self) -> Result<Report, LedgerError> {
        let summary = self.summary();
        let outcomes = self.outcomes.into_inner().unwrap_or_else(|e| e.into_inner());

        let missing: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::MissingOutcomes(missing));
        }

        let failures = outcomes
            .into_iter()
            .flatten()
            .filter(|o| !o.status.is_success())
            .collect();
        Ok(Report { failures, summary })
    }
}
