use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::cancel::CancellationState;
use crate::error::ApiError;
use crate::music_api::{DynMusicApi, SearchQuery, Song};
use crate::retry::{RateLimitGate, RetryPolicy, retry_with_backoff};
use crate::source::SourceTrack;
use crate::utils::{base_title, clean_song_name, normalize, normalize_title, similarity};

const TITLE_WEIGHT: f64 = 0.6;
const ARTIST_WEIGHT: f64 = 0.4;
// a title that only matches once version markers are dropped is never a
// perfect match
const BASE_TITLE_DISCOUNT: f64 = 0.9;

/// How a catalog track was chosen.
///
/// Key matches are split in two: `Exact` when artist and title agree once
/// case is ignored, `Normalized` when they only agree after punctuation,
/// featuring credits and spacing are folded away. Both rank above `Fuzzy`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Same artist and title, ignoring only case.
    Exact,
    /// Same normalized artist and title.
    Normalized,
    /// Best similarity score, strictly above the acceptance threshold.
    Fuzzy,
    None,
}

/// Matcher verdict for one source track.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    pub source: SourceTrack,
    pub catalog_track_id: Option<String>,
    pub confidence: f64,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub song: Option<&'a Song>,
    pub confidence: f64,
    pub method: MatchMethod,
}

struct SourceKeys {
    artist: String,
    title: String,
    base_title: String,
    album: Option<String>,
}

impl SourceKeys {
    fn new(track: &SourceTrack) -> Self {
        Self {
            artist: normalize(&track.artist),
            title: normalize_title(&track.title),
            base_title: base_title(&clean_song_name(&track.title)),
            album: track.album.as_deref().map(normalize),
        }
    }
}

struct CandidateKeys {
    title: String,
    base_title: String,
    first_artist: String,
    all_artists: String,
    album: Option<String>,
}

impl CandidateKeys {
    fn new(song: &Song) -> Self {
        let first_artist = song
            .artists
            .first()
            .map(|a| normalize(&a.name))
            .unwrap_or_default();
        let all_artists = normalize(
            &song
                .artists
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
        Self {
            title: normalize_title(&song.name),
            base_title: base_title(&clean_song_name(&song.name)),
            first_artist,
            all_artists,
            album: song.album.as_ref().map(|a| normalize(&a.name)),
        }
    }

    fn artist_matches(&self, source: &SourceKeys) -> bool {
        source.artist == self.first_artist || source.artist == self.all_artists
    }

    fn album_matches(&self, source: &SourceKeys) -> bool {
        source.album.is_some() && self.album == source.album
    }

    fn score(&self, source: &SourceKeys) -> f64 {
        let title = similarity(&source.title, &self.title)
            .max(BASE_TITLE_DISCOUNT * similarity(&source.base_title, &self.base_title));
        let artist = similarity(&source.artist, &self.first_artist)
            .max(similarity(&source.artist, &self.all_artists));
        TITLE_WEIGHT * title + ARTIST_WEIGHT * artist
    }
}

fn is_case_exact(track: &SourceTrack, song: &Song) -> bool {
    let title_eq = track.title.trim().to_lowercase() == song.name.trim().to_lowercase();
    let artist = track.artist.trim().to_lowercase();
    let artist_eq = song
        .artists
        .first()
        .is_some_and(|a| a.name.trim().to_lowercase() == artist);
    title_eq && artist_eq
}

/// Pick the best catalog candidate for `track`.
///
/// Normalized-key matches win over fuzzy ones, so a live version or remaster
/// is never chosen when the canonical recording was returned. Among key
/// matches the album decides, then catalog order. Fuzzy matches must score
/// above `threshold`.
pub fn select_candidate<'a>(
    track: &SourceTrack,
    candidates: &'a [Song],
    threshold: f64,
) -> Selection<'a> {
    let source = SourceKeys::new(track);
    let keyed: Vec<(&Song, CandidateKeys)> = candidates
        .iter()
        .map(|song| (song, CandidateKeys::new(song)))
        .collect();

    let mut exact = keyed
        .iter()
        .filter(|(_, keys)| keys.title == source.title && keys.artist_matches(&source));
    if let Some(first) = exact.clone().next() {
        let &(song, _) = exact
            .find(|(_, keys)| keys.album_matches(&source))
            .unwrap_or(first);
        let method = if is_case_exact(track, song) {
            MatchMethod::Exact
        } else {
            MatchMethod::Normalized
        };
        return Selection {
            song: Some(song),
            confidence: 1.0,
            method,
        };
    }

    let mut best: Option<(&Song, f64, bool)> = None;
    for (song, keys) in keyed.iter().map(|(song, keys)| (*song, keys)) {
        let score = keys.score(&source);
        let album = keys.album_matches(&source);
        let better = match best {
            None => true,
            Some((_, best_score, best_album)) => {
                score > best_score || (score == best_score && album && !best_album)
            }
        };
        if better {
            best = Some((song, score, album));
        }
    }

    match best {
        Some((song, score, _)) if score > threshold => Selection {
            song: Some(song),
            confidence: score,
            method: MatchMethod::Fuzzy,
        },
        Some((_, score, _)) => Selection {
            song: None,
            confidence: score,
            method: MatchMethod::None,
        },
        None => Selection {
            song: None,
            confidence: 0.0,
            method: MatchMethod::None,
        },
    }
}

/// Resolves source tracks against the destination catalog.
pub struct Matcher {
    api: DynMusicApi,
    policy: RetryPolicy,
    gate: Arc<RateLimitGate>,
    cancel: CancellationState,
    threshold: f64,
    search_limit: u32,
}

impl Matcher {
    pub fn new(
        api: DynMusicApi,
        policy: RetryPolicy,
        gate: Arc<RateLimitGate>,
        cancel: CancellationState,
        threshold: f64,
        search_limit: u32,
    ) -> Self {
        Self {
            api,
            policy,
            gate,
            cancel,
            threshold,
            search_limit,
        }
    }

    fn build_queries(&self, track: &SourceTrack) -> Vec<SearchQuery> {
        let query = SearchQuery {
            artist: track.artist.clone(),
            title: clean_song_name(&track.title),
            album: None,
            limit: self.search_limit,
        };
        match &track.album {
            // otherwise it might be a single
            Some(album) if normalize(album) != normalize(&track.title) => vec![
                SearchQuery {
                    album: Some(album.clone()),
                    ..query.clone()
                },
                query,
            ],
            _ => vec![query],
        }
    }

    /// Search the catalog and select a candidate.
    ///
    /// Errors are only returned once retries are exhausted, or at once for
    /// fatal and permanent failures; finding nothing is not an error.
    pub async fn find_match(&self, track: &SourceTrack) -> Result<CandidateMatch, ApiError> {
        let mut best_confidence: f64 = 0.0;

        for query in self.build_queries(track) {
            let songs = retry_with_backoff(&self.policy, &self.gate, &self.cancel, "search", || {
                self.api.search_songs(&query)
            })
            .await?;

            let selection = select_candidate(track, &songs, self.threshold);
            if let Some(song) = selection.song {
                debug!(
                    "matched {} - {} to {} ({:?}, {:.2})",
                    track.artist, track.title, song.id, selection.method, selection.confidence
                );
                return Ok(CandidateMatch {
                    source: track.clone(),
                    catalog_track_id: Some(song.id.clone()),
                    confidence: selection.confidence,
                    method: selection.method,
                });
            }
            best_confidence = best_confidence.max(selection.confidence);
            debug!(
                "no acceptable candidate for query `{}` ({} results)",
                query.to_query_string(),
                songs.len()
            );
        }

        Ok(CandidateMatch {
            source: track.clone(),
            catalog_track_id: None,
            confidence: best_confidence,
            method: MatchMethod::None,
        })
    }
}
