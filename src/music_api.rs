use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ApiError;
use crate::utils::clean_quotes;

pub type DynMusicApi = Arc<dyn MusicApi + Send + Sync>;

/// Destination catalog: search plus the liked-songs collection.
#[async_trait]
pub trait MusicApi {
    fn api_type(&self) -> MusicApiType;

    /// Largest number of ids accepted by a single like/contains call.
    fn max_batch_size(&self) -> usize;

    /// Candidates in the catalog's relevance order.
    async fn search_songs(&self, query: &SearchQuery) -> Result<Vec<Song>, ApiError>;

    /// Whether each id is already in liked songs. Read-only.
    async fn check_likes(&self, ids: &[String]) -> Result<Vec<bool>, ApiError>;

    /// Add ids to liked songs. The result has one status per input id, in order.
    async fn add_likes(&self, ids: &[String]) -> Result<Vec<LikeStatus>, ApiError>;
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicApiType {
    Spotify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeStatus {
    Added,
    AlreadyPresent,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub limit: u32,
}

impl SearchQuery {
    // the "q" parameter is limited at ~100 chars
    const MAX_QUERY_LEN: usize = 100;

    /// Query string using field filters, dropping the album filter when it
    /// would not fit.
    pub fn to_query_string(&self) -> String {
        let mut parts = vec![
            format!("track:{}", clean_quotes(&self.title)),
            format!("artist:{}", clean_quotes(&self.artist)),
        ];
        if let Some(album) = &self.album {
            let album = format!("album:{}", clean_quotes(album));
            if parts.join(" ").len() + album.len() < Self::MAX_QUERY_LEN {
                parts.push(album);
            }
        }
        parts.join(" ")
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Song {
    pub id: String,
    pub name: String,
    pub album: Option<Album>,
    pub artists: Vec<Artist>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Album {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Artist {
    pub id: Option<String>,
    pub name: String,
}
