//! Web-player access tokens obtained from a logged-in browser session.

use chrono::{DateTime, Utc};
use cookie::Cookie;
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;

pub const SP_DC_INSTRUCTIONS: &str = "\
1. open a private browser window at https://accounts.spotify.com/en/login?continue=https:%2F%2Fopen.spotify.com%2F
2. open the developer tools and select the storage (or 'Application') tab
3. log in to Spotify
4. copy the value of the `sp_dc` cookie under https://open.spotify.com
5. do the same for the `sp_key` cookie
6. close the window without logging out";

const TOKEN_URL: &str =
    "https://open.spotify.com/get_access_token?reason=transport&productType=web_player";

// the endpoint refuses clients that don't look like a desktop browser
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Deserialize, Debug, Clone)]
pub struct TokenResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "accessTokenExpirationTimestampMs")]
    pub expiry_ms: i64,
}

impl TokenResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expiry_ms)
    }
}

pub fn cookie_header(sp_dc: &str, sp_key: &str) -> String {
    [Cookie::new("sp_dc", sp_dc), Cookie::new("sp_key", sp_key)]
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Exchange the `sp_dc`/`sp_key` cookies for a bearer token. Any failure here
/// means the cookies are unusable, so every error is reported as an auth error.
pub async fn fetch(
    client: &reqwest::Client,
    sp_dc: &str,
    sp_key: &str,
) -> Result<TokenResponse, ApiError> {
    debug!("requesting web player token");
    let res = client
        .get(TOKEN_URL)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(reqwest::header::COOKIE, cookie_header(sp_dc, sp_key))
        .send()
        .await
        .map_err(|e| ApiError::Auth(format!("token request failed: {e}")))?;

    let status = res.status();
    if !status.is_success() {
        return Err(ApiError::Auth(format!(
            "token endpoint answered {status}, check the sp_dc and sp_key cookies"
        )));
    }
    res.json::<TokenResponse>()
        .await
        .map_err(|e| ApiError::Auth(format!("unexpected token response: {e}")))
}
