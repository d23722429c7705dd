mod model;
mod response;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use reqwest::Response;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, trace, warn};

use self::model::{
    SpotifyErrorResponse, SpotifyOAuthRefresh, SpotifyOAuthToken, SpotifySearchResponse,
};
use crate::ImportConfig;
use crate::access_token;
use crate::error::ApiError;
use crate::music_api::{LikeStatus, MusicApi, MusicApiType, SearchQuery, Song};

pub struct SpotifyApi {
    client: reqwest::Client,
}

#[derive(Debug)]
enum HttpMethod<'a> {
    Get(&'a serde_json::Value),
    Put(&'a serde_json::Value),
}

impl SpotifyApi {
    const BASE_API: &'static str = "https://api.spotify.com/v1";
    const AUTHORIZE_URL: &'static str = "https://accounts.spotify.com/authorize";
    const TOKEN_URL: &'static str = "https://accounts.spotify.com/api/token";
    const REDIRECT_URI_HOST: &'static str = "localhost:8888";
    const REDIRECT_URI_URL: &'static str = "http://localhost:8888/callback";
    const SCOPES: &'static [&'static str] = &["user-library-read", "user-library-modify"];
    // documented limit of the /me/tracks endpoints
    const MAX_IDS: usize = 50;
    const MAX_SEARCH_LIMIT: u32 = 50;

    /// Use an already issued bearer token.
    pub fn new_token(token: &str, config: &ImportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse()?);
        headers.insert("content-type", "application/json".parse()?);

        let client = Self::client_builder(config)?
            .default_headers(headers)
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }

    /// Exchange web player cookies for a token.
    pub async fn new_web_player(sp_dc: &str, sp_key: &str, config: &ImportConfig) -> Result<Self> {
        let client = Self::client_builder(config)?.build()?;
        let token = access_token::fetch(&client, sp_dc, sp_key).await?;
        match token.expires_at() {
            Some(expiry) => info!("web player token valid until {}", expiry),
            None => warn!("web player token has no usable expiry"),
        }
        Self::new_token(&token.access_token, config)
    }

    /// Authorization code flow, reusing the cached refresh token when present.
    pub async fn new_oauth(
        client_id: &str,
        client_secret: &str,
        oauth_token_path: PathBuf,
        clear_cache: bool,
        config: &ImportConfig,
    ) -> Result<Self> {
        let token = if !oauth_token_path.exists() || clear_cache {
            info!("requesting new token");
            Self::request_token(client_id, client_secret).await?
        } else {
            info!("refreshing token");
            Self::refresh_token(client_id, client_secret, &oauth_token_path).await?
        };
        if let Some(parent) = oauth_token_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&oauth_token_path)?;
        serde_json::to_writer(&mut file, &token)?;

        Self::new_token(&token.access_token, config)
    }

    fn client_builder(config: &ImportConfig) -> Result<reqwest::ClientBuilder> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(proxy) = &config.proxy {
            builder = builder
                .proxy(reqwest::Proxy::all(proxy)?)
                .danger_accept_invalid_certs(true);
        }
        Ok(builder)
    }

    fn build_authorization_url(client_id: &str) -> Result<String> {
        let mut params = HashMap::new();
        params.insert("response_type", "code");
        let scopes = Self::SCOPES.join(" ");
        params.insert("scope", &scopes);
        params.insert("client_id", client_id);
        params.insert("redirect_uri", Self::REDIRECT_URI_URL);

        Ok(reqwest::Url::parse_with_params(Self::AUTHORIZE_URL, params)?.to_string())
    }

    async fn request_token(client_id: &str, client_secret: &str) -> Result<SpotifyOAuthToken> {
        let auth_url = Self::build_authorization_url(client_id)?;
        let auth_code = Self::listen_for_code(&auth_url).await?;

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", &auth_code);
        params.insert("redirect_uri", Self::REDIRECT_URI_URL);

        let client = reqwest::Client::new();
        let res = client
            .post(Self::TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .form(&params)
            .send()
            .await?;
        let res = res
            .error_for_status()
            .map_err(|e| ApiError::Auth(e.to_string()))?;
        let token: SpotifyOAuthToken = res.json().await?;
        Ok(token)
    }

    async fn refresh_token(
        client_id: &str,
        client_secret: &str,
        oauth_token_path: &Path,
    ) -> Result<SpotifyOAuthToken> {
        let reader = std::fs::File::open(oauth_token_path)?;
        let mut oauth_token: SpotifyOAuthToken = serde_json::from_reader(reader)
            .wrap_err_with(|| format!("invalid token cache {:?}, try --clear-cache", oauth_token_path))?;

        let params = json!({
            "grant_type": "refresh_token",
            "refresh_token": &oauth_token.refresh_token,
        });
        let client = reqwest::Client::new();
        let res = client
            .post(Self::TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .form(&params)
            .send()
            .await?;
        let res = res
            .error_for_status()
            .map_err(|e| ApiError::Auth(e.to_string()))?;
        let refresh: SpotifyOAuthRefresh = res.json().await?;
        oauth_token.access_token = refresh.access_token;
        oauth_token.expires_in = refresh.expires_in;
        oauth_token.scope = refresh.scope;
        if let Some(refresh_token) = refresh.refresh_token {
            oauth_token.refresh_token = refresh_token;
        }
        Ok(oauth_token)
    }

    async fn listen_for_code(auth_url: &str) -> Result<String> {
        let listener = TcpListener::bind(Self::REDIRECT_URI_HOST).await?;
        info!("authorize the app in your browser: {}", auth_url);
        if let Err(e) = webbrowser::open(auth_url) {
            warn!("could not open a browser ({}), open the url above manually", e);
        }

        let (mut socket, _) = listener.accept().await?;
        let mut buffer = [0; 2048];
        let n = socket.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..n]);
        let code = Self::parse_callback(&request);

        let body = match &code {
            Ok(_) => "Authorization complete, you can close this window.",
            Err(_) => "Authorization failed, check the terminal.",
        };
        let reply = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        if let Err(e) = socket.write_all(reply.as_bytes()).await {
            warn!("could not answer the browser: {}", e);
        }
        code
    }

    /// Authorization code from the raw callback request.
    fn parse_callback(request: &str) -> Result<String> {
        let target = request
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| eyre!("invalid spotify server callback"))?;
        let url = reqwest::Url::parse(&format!("http://{}{}", Self::REDIRECT_URI_HOST, target))?;
        if let Some((_, error)) = url.query_pairs().find(|(k, _)| k == "error") {
            return Err(ApiError::Auth(format!("authorization refused: {error}")).into());
        }
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .ok_or_else(|| eyre!("spotify server returned no authorization code"))?
            .1
            .to_string();
        Ok(code)
    }

    fn build_endpoint(&self, path: &str) -> String {
        format!("{}{}", Self::BASE_API, path)
    }

    async fn make_request(&self, path: &str, method: &HttpMethod<'_>) -> Result<Response, ApiError> {
        let endpoint = self.build_endpoint(path);
        let request = match method {
            HttpMethod::Get(p) => self.client.get(endpoint).query(p),
            HttpMethod::Put(b) => self.client.put(endpoint).json(b),
        };
        let res = request.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let retry_after = parse_retry_after(res.headers());
        let text = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<SpotifyErrorResponse>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        Err(ApiError::from_status(status.as_u16(), message, retry_after))
    }

    async fn make_request_json<T>(&self, path: &str, method: &HttpMethod<'_>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let res = self.make_request(path, method).await?;
        let text = res.text().await?;
        trace!("{} -> {}", path, text);
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(format!("{path}: {e}")))
    }
}

/// `Retry-After` in seconds. Spotify never sends the HTTP-date form.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl MusicApi for SpotifyApi {
    fn api_type(&self) -> MusicApiType {
        MusicApiType::Spotify
    }

    fn max_batch_size(&self) -> usize {
        Self::MAX_IDS
    }

    async fn search_songs(&self, query: &SearchQuery) -> Result<Vec<Song>, ApiError> {
        let params = json!({
            "type": "track",
            "q": query.to_query_string(),
            "limit": query.limit.clamp(1, Self::MAX_SEARCH_LIMIT),
        });
        let res: SpotifySearchResponse = self
            .make_request_json("/search", &HttpMethod::Get(&params))
            .await?;
        Ok(res.into())
    }

    async fn check_likes(&self, ids: &[String]) -> Result<Vec<bool>, ApiError> {
        let mut liked = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(Self::MAX_IDS) {
            let params = json!({ "ids": chunk.join(",") });
            let res: Vec<bool> = self
                .make_request_json("/me/tracks/contains", &HttpMethod::Get(&params))
                .await?;
            if res.len() != chunk.len() {
                return Err(ApiError::InvalidResponse(format!(
                    "{} flags for {} ids",
                    res.len(),
                    chunk.len()
                )));
            }
            liked.extend(res);
        }
        Ok(liked)
    }

    async fn add_likes(&self, ids: &[String]) -> Result<Vec<LikeStatus>, ApiError> {
        // the save endpoint answers with an empty body whether or not a track
        // was already saved, so ask first
        let liked = self.check_likes(ids).await?;
        let missing: Vec<&String> = ids
            .iter()
            .zip(&liked)
            .filter(|(_, liked)| !**liked)
            .map(|(id, _)| id)
            .collect();

        for chunk in missing.chunks(Self::MAX_IDS) {
            let body = json!({ "ids": chunk });
            self.make_request("/me/tracks", &HttpMethod::Put(&body)).await?;
        }

        Ok(liked
            .into_iter()
            .map(|liked| {
                if liked {
                    LikeStatus::AlreadyPresent
                } else {
                    LikeStatus::Added
                }
            })
            .collect())
    }
}
