use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spotifyimport::ImportConfig;
use spotifyimport::error::ApiError;
use spotifyimport::import::{ImportOutcome, import};
use spotifyimport::ledger::OutcomeStatus;
use spotifyimport::matcher::MatchMethod;
use spotifyimport::music_api::{
    Album, Artist, DynMusicApi, LikeStatus, MusicApi, MusicApiType, SearchQuery, Song,
};
use spotifyimport::source::{SourceTrack, decode};
use spotifyimport::utils::normalize;

/// In-memory catalog and liked-songs collection.
#[derive(Default)]
struct FakeCatalog {
    songs: Vec<Song>,
    liked: Mutex<HashSet<String>>,
    searches: AtomicUsize,
    check_calls: AtomicUsize,
    add_calls: AtomicUsize,
    // batches the like endpoint accepted
    accepted: Mutex<Vec<Vec<String>>>,
    // answer this many like calls with a rate limit first
    rate_limited_adds: AtomicUsize,
    // searches for this title fail authentication
    expired_for: Option<String>,
    // every search answers 503
    search_down: bool,
    // every liked-status check answers 503
    check_down: bool,
    // batches holding this id are refused; alone it comes back rejected
    unavailable_id: Option<String>,
    // defaults to 50
    batch_limit: Option<usize>,
}

impl FakeCatalog {
    fn with_songs(songs: Vec<Song>) -> Self {
        Self {
            songs,
            ..Default::default()
        }
    }

    fn like(&self, id: &str) {
        self.liked.lock().unwrap().insert(id.to_string());
    }

    fn liked(&self) -> HashSet<String> {
        self.liked.lock().unwrap().clone()
    }
}

#[async_trait]
impl MusicApi for FakeCatalog {
    fn api_type(&self) -> MusicApiType {
        MusicApiType::Spotify
    }

    fn max_batch_size(&self) -> usize {
        self.batch_limit.unwrap_or(50)
    }

    async fn search_songs(&self, query: &SearchQuery) -> Result<Vec<Song>, ApiError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.search_down {
            return Err(unavailable());
        }
        if self.expired_for.as_deref() == Some(query.title.as_str()) {
            return Err(ApiError::Auth("401: The access token expired".into()));
        }

        let by_artist: Vec<&Song> = self
            .songs
            .iter()
            .filter(|s| s.artists.iter().any(|a| normalize(&a.name) == normalize(&query.artist)))
            .collect();
        let title = normalize(&query.title);
        let by_title: Vec<&Song> = by_artist
            .iter()
            .copied()
            .filter(|s| normalize(&s.name).contains(&title))
            .collect();
        let found = if by_title.is_empty() { by_artist } else { by_title };
        Ok(found
            .into_iter()
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn check_likes(&self, ids: &[String]) -> Result<Vec<bool>, ApiError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.check_down {
            return Err(unavailable());
        }
        let liked = self.liked.lock().unwrap();
        Ok(ids.iter().map(|id| liked.contains(id)).collect())
    }

    async fn add_likes(&self, ids: &[String]) -> Result<Vec<LikeStatus>, ApiError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let limited = self
            .rate_limited_adds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if limited {
            return Err(ApiError::RateLimited {
                retry_after: Some(Duration::from_millis(20)),
            });
        }

        if let Some(bad) = &self.unavailable_id {
            if ids.contains(bad) {
                if ids.len() > 1 {
                    return Err(ApiError::Rejected {
                        status: 400,
                        message: "invalid id".into(),
                    });
                }
                return Ok(vec![LikeStatus::Rejected(
                    "not available in this market".into(),
                )]);
            }
        }

        let mut liked = self.liked.lock().unwrap();
        let statuses = ids
            .iter()
            .map(|id| {
                if liked.insert(id.clone()) {
                    LikeStatus::Added
                } else {
                    LikeStatus::AlreadyPresent
                }
            })
            .collect();
        self.accepted.lock().unwrap().push(ids.to_vec());
        Ok(statuses)
    }
}

fn unavailable() -> ApiError {
    ApiError::Server {
        status: 503,
        message: "unavailable".into(),
    }
}

fn song(id: &str, name: &str, artist: &str, album: &str) -> Song {
    Song {
        id: id.into(),
        name: name.into(),
        album: Some(Album {
            id: None,
            name: album.into(),
        }),
        artists: vec![Artist {
            id: None,
            name: artist.into(),
        }],
    }
}

fn track(artist: &str, title: &str) -> SourceTrack {
    SourceTrack {
        artist: artist.into(),
        title: title.into(),
        album: None,
        played_at: None,
    }
}

fn numbered_catalog(n: usize) -> (Vec<Song>, Vec<SourceTrack>) {
    let songs = (0..n)
        .map(|i| song(&format!("id{i}"), &format!("Song {i}"), "Artist", "Album"))
        .collect();
    let tracks = (0..n).map(|i| track("Artist", &format!("Song {i}"))).collect();
    (songs, tracks)
}

fn beatles() -> Vec<Song> {
    vec![
        song("beatles-let-it-be", "Let It Be", "The Beatles", "Let It Be"),
        song(
            "beatles-let-it-be-live",
            "Let It Be - Live",
            "The Beatles",
            "Live At The BBC",
        ),
        song("radiohead-karma", "Karma Police", "Radiohead", "OK Computer"),
    ]
}

fn mutating() -> ImportConfig {
    ImportConfig {
        mutate: true,
        ..ImportConfig::default()
    }
}

async fn run(catalog: &Arc<FakeCatalog>, tracks: Vec<SourceTrack>, config: &ImportConfig) -> ImportOutcome {
    let api: DynMusicApi = catalog.clone();
    import(tracks, api, config).await.unwrap()
}

#[tokio::test]
async fn exact_match_in_dry_run() {
    let catalog = Arc::new(FakeCatalog::with_songs(beatles()));
    let input = br#"[{"artistName": "The Beatles", "trackName": "Let It Be", "playedAt": "2024-01-05T08:30:00Z"}]"#;
    let tracks = decode(input).unwrap();

    let outcome = run(&catalog, tracks, &ImportConfig::default()).await;

    assert_eq!(outcome.report.summary.would_add, 1);
    assert!(outcome.report.failures.is_empty());
    assert_eq!(outcome.stats.previewed, 1);
    assert_eq!(catalog.add_calls.load(Ordering::SeqCst), 0);
    assert!(catalog.liked().is_empty());
    assert!(outcome.aborted.is_none());
}

#[tokio::test]
async fn exact_match_is_added() {
    let catalog = Arc::new(FakeCatalog::with_songs(beatles()));
    let outcome = run(&catalog, vec![track("The Beatles", "Let It Be")], &mutating()).await;

    assert_eq!(outcome.report.summary.added, 1);
    assert_eq!(catalog.liked(), HashSet::from(["beatles-let-it-be".to_string()]));
    assert_eq!(outcome.stats.submitted, 1);
}

#[tokio::test]
async fn every_track_gets_one_outcome_and_report_holds_failures_only() {
    let catalog = Arc::new(FakeCatalog::with_songs(beatles()));
    catalog.like("radiohead-karma");
    let tracks = vec![
        track("The Beatles", "Let It Be"),
        track("Radiohead", "Creep"),
        track("Radiohead", "Karma Police"),
        track("Nobody", "Nothing"),
        track("the beatles", "let it be"),
    ];

    let outcome = run(&catalog, tracks, &mutating()).await;
    let summary = outcome.report.summary;

    assert_eq!(summary.total(), 5);
    assert_eq!(summary.added, 2);
    assert_eq!(summary.already_present, 1);
    assert_eq!(summary.unmatched, 2);

    let failures = &outcome.report.failures;
    assert_eq!(failures.iter().map(|f| f.index).collect::<Vec<_>>(), vec![1, 3]);
    assert!(failures.iter().all(|f| f.status == OutcomeStatus::Unmatched));
    assert_eq!(failures[0].match_method, Some(MatchMethod::None));
    assert!(
        failures[0]
            .error_detail
            .as_deref()
            .unwrap()
            .starts_with("no catalog match (best candidate scored")
    );
    assert_eq!(failures[1].error_detail.as_deref(), Some("no catalog match"));
}

#[tokio::test]
async fn repeated_plays_are_searched_once() {
    let catalog = Arc::new(FakeCatalog::with_songs(beatles()));
    let tracks = vec![track("The Beatles", "Let It Be"); 4];

    let outcome = run(&catalog, tracks, &mutating()).await;

    assert_eq!(outcome.report.summary.added, 4);
    assert_eq!(catalog.searches.load(Ordering::SeqCst), 1);
    assert_eq!(*catalog.accepted.lock().unwrap(), vec![vec!["beatles-let-it-be".to_string()]]);
}

#[tokio::test]
async fn already_liked_tracks_in_a_full_batch() {
    let (songs, tracks) = numbered_catalog(50);
    let catalog = Arc::new(FakeCatalog::with_songs(songs));
    for id in ["id3", "id17", "id42"] {
        catalog.like(id);
    }

    let outcome = run(&catalog, tracks, &mutating()).await;

    assert_eq!(outcome.report.summary.already_present, 3);
    assert_eq!(outcome.report.summary.added, 47);
    assert!(outcome.report.failures.is_empty());
    assert_eq!(catalog.add_calls.load(Ordering::SeqCst), 1);
    assert_eq!(catalog.liked().len(), 50);
}

#[tokio::test]
async fn dry_run_is_idempotent_and_read_only() {
    let (songs, mut tracks) = numbered_catalog(60);
    tracks.push(track("Artist", "Missing Song"));
    let catalog = Arc::new(FakeCatalog::with_songs(songs));
    catalog.like("id7");
    let config = ImportConfig::default();

    let first = run(&catalog, tracks.clone(), &config).await;
    let second = run(&catalog, tracks, &config).await;

    assert_eq!(first.report.summary, second.report.summary);
    assert_eq!(first.report.failures, second.report.failures);
    assert_eq!(first.report.summary.would_add, 59);
    assert_eq!(first.report.summary.already_present, 1);
    assert_eq!(first.stats.previewed, 2);
    assert_eq!(first.stats.submitted, 0);
    assert_eq!(catalog.add_calls.load(Ordering::SeqCst), 0);
    assert_eq!(catalog.liked(), HashSet::from(["id7".to_string()]));
}

#[tokio::test]
async fn rate_limit_does_not_drop_batches() {
    let (songs, tracks) = numbered_catalog(120);
    let catalog = Arc::new(FakeCatalog::with_songs(songs));
    catalog.rate_limited_adds.store(2, Ordering::SeqCst);
    let config = ImportConfig {
        rate_limit_backoff: Duration::from_millis(20),
        ..mutating()
    };

    let outcome = run(&catalog, tracks, &config).await;

    assert_eq!(outcome.stats.submitted, 3);
    assert_eq!(catalog.accepted.lock().unwrap().len(), 3);
    assert_eq!(outcome.report.summary.added, 120);
    assert!(outcome.report.failures.is_empty());
}

#[tokio::test]
async fn expired_token_aborts_but_records_every_track() {
    let (songs, mut tracks) = numbered_catalog(5);
    tracks.insert(1, track("Artist", "Poison"));
    let catalog = Arc::new(FakeCatalog {
        songs,
        expired_for: Some("Poison".into()),
        ..Default::default()
    });
    let config = ImportConfig {
        concurrency_limit: 1,
        ..mutating()
    };

    let outcome = run(&catalog, tracks, &config).await;

    let reason = outcome.aborted.expect("run should abort");
    assert!(reason.contains("access token expired"));
    assert_eq!(outcome.report.summary.total(), 6);
    assert_eq!(outcome.report.summary.submit_failed, 6);
    assert_eq!(
        outcome.report.failures.iter().map(|f| f.index).collect::<Vec<_>>(),
        (0..6).collect::<Vec<_>>()
    );
    assert!(
        outcome.report.failures[5]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("run aborted")
    );
    assert_eq!(catalog.add_calls.load(Ordering::SeqCst), 0);
    assert!(catalog.liked().is_empty());
}

#[tokio::test]
async fn empty_input_gives_empty_report() {
    let catalog = Arc::new(FakeCatalog::default());
    let outcome = run(&catalog, vec![], &mutating()).await;
    assert_eq!(outcome.report.summary.total(), 0);
    assert!(outcome.report.failures.is_empty());
    assert_eq!(catalog.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_liked_check_in_dry_run_is_reported() {
    let (songs, tracks) = numbered_catalog(3);
    let catalog = Arc::new(FakeCatalog {
        songs,
        check_down: true,
        ..Default::default()
    });
    let config = ImportConfig {
        retry_budget: 0,
        ..ImportConfig::default()
    };

    let outcome = run(&catalog, tracks, &config).await;
    let summary = outcome.report.summary;

    assert_eq!(summary.would_add, 0);
    assert_eq!(summary.submit_failed, 3);
    assert_eq!(outcome.report.failures.len(), 3);
    for failure in &outcome.report.failures {
        assert_eq!(failure.status, OutcomeStatus::SubmitFailed);
        assert!(failure.catalog_track_id.is_some());
        assert!(
            failure
                .error_detail
                .as_deref()
                .unwrap()
                .starts_with("dry run could not check liked songs: server error 503")
        );
    }
    assert!(outcome.aborted.is_none());
    assert_eq!(catalog.add_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refused_batch_is_resubmitted_one_id_at_a_time() {
    let (songs, tracks) = numbered_catalog(3);
    let catalog = Arc::new(FakeCatalog {
        songs,
        unavailable_id: Some("id1".into()),
        ..Default::default()
    });

    let outcome = run(&catalog, tracks, &mutating()).await;
    let summary = outcome.report.summary;

    assert_eq!(summary.added, 2);
    assert_eq!(summary.submit_failed, 1);
    // the whole batch, then each id on its own
    assert_eq!(catalog.add_calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        catalog.liked(),
        HashSet::from(["id0".to_string(), "id2".to_string()])
    );

    let failures = &outcome.report.failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert_eq!(failures[0].status, OutcomeStatus::SubmitFailed);
    assert_eq!(failures[0].catalog_track_id.as_deref(), Some("id1"));
    assert_eq!(
        failures[0].error_detail.as_deref(),
        Some("rejected by the service: not available in this market")
    );
}

#[tokio::test]
async fn search_out_of_retries_is_a_submit_failure() {
    let (songs, tracks) = numbered_catalog(3);
    let catalog = Arc::new(FakeCatalog {
        songs,
        search_down: true,
        ..Default::default()
    });
    let config = ImportConfig {
        retry_budget: 1,
        ..mutating()
    };

    let outcome = run(&catalog, tracks, &config).await;
    let summary = outcome.report.summary;

    assert_eq!(summary.submit_failed, 3);
    assert_eq!(summary.unmatched, 0);
    assert!(outcome.aborted.is_none());
    // one retry per track
    assert_eq!(catalog.searches.load(Ordering::SeqCst), 6);
    for failure in &outcome.report.failures {
        assert_eq!(failure.status, OutcomeStatus::SubmitFailed);
        assert!(failure.catalog_track_id.is_none());
        assert_eq!(
            failure.error_detail.as_deref(),
            Some("catalog search failed: server error 503: unavailable")
        );
    }
    assert_eq!(catalog.add_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_batch_limit_still_submits() {
    let (songs, tracks) = numbered_catalog(3);
    let catalog = Arc::new(FakeCatalog {
        songs,
        batch_limit: Some(0),
        ..Default::default()
    });

    let outcome = run(&catalog, tracks, &mutating()).await;

    assert_eq!(outcome.stats.submitted, 3);
    assert_eq!(outcome.report.summary.added, 3);
    assert!(catalog.accepted.lock().unwrap().iter().all(|batch| batch.len() == 1));
}
