use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
pub struct SpotifySearchResponse {
    pub tracks: SpotifyPageResponse<SpotifySongResponse>,
}

#[derive(Deserialize, Debug)]
pub struct SpotifyPageResponse<T> {
    pub items: Vec<T>,
    #[allow(dead_code)]
    pub total: u32,
    #[allow(dead_code)]
    pub next: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SpotifySongResponse {
    // local files and some unavailable tracks come back without an id
    pub id: Option<String>,
    pub name: String,
    pub artists: Vec<SpotifyArtistResponse>,
    pub album: Option<SpotifyAlbumResponse>,
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Deserialize, Debug)]
pub struct SpotifyArtistResponse {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct SpotifyAlbumResponse {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct SpotifyErrorResponse {
    pub error: SpotifyErrorBody,
}

#[derive(Deserialize, Debug)]
pub struct SpotifyErrorBody {
    #[allow(dead_code)]
    pub status: u16,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SpotifyOAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_in: u64,
    pub refresh_token: String,
}

/// Refreshing may or may not rotate the refresh token.
#[derive(Deserialize, Debug)]
pub struct SpotifyOAuthRefresh {
    pub access_token: String,
    pub scope: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}
