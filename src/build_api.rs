use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::{Result, eyre};
use spotifyimport::ImportConfig;
use spotifyimport::music_api::DynMusicApi;
use spotifyimport::spotify::SpotifyApi;
use tracing::info;

use crate::args::SpotifyArgs;

#[async_trait]
pub trait BuildApi {
    async fn parse(&self, config: &ImportConfig, config_dir: &Path) -> Result<DynMusicApi>;
}

#[async_trait]
impl BuildApi for SpotifyArgs {
    async fn parse(&self, config: &ImportConfig, config_dir: &Path) -> Result<DynMusicApi> {
        let api = if let Some(token) = &self.token {
            info!("using the provided access token");
            SpotifyApi::new_token(token, config)?
        } else if let (Some(sp_dc), Some(sp_key)) = (&self.sp_dc, &self.sp_key) {
            info!("using a web player token");
            SpotifyApi::new_web_player(sp_dc, sp_key, config).await?
        } else {
            let Some(client_id) = &self.client_id else {
                return Err(eyre!(
                    "Missing Spotify credentials: pass --token, --sp-dc/--sp-key or --client-id/--client-secret"
                ));
            };
            let Some(client_secret) = &self.client_secret else {
                return Err(eyre!("Missing Spotify client_secret"));
            };
            let oauth_token_path = config_dir.join("spotify_oauth.json");
            SpotifyApi::new_oauth(
                client_id,
                client_secret,
                oauth_token_path,
                self.clear_cache,
                config,
            )
            .await?
        };
        let api: DynMusicApi = Arc::new(api);
        Ok(api)
    }
}
