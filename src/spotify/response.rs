use crate::music_api::{Album, Artist, Song};

use super::model::{SpotifySearchResponse, SpotifySongResponse};

impl TryFrom<SpotifySongResponse> for Song {
    type Error = String;

    fn try_from(track: SpotifySongResponse) -> Result<Self, Self::Error> {
        if track.is_local {
            return Err(format!("{} is a local file", track.name));
        }
        let Some(id) = track.id else {
            return Err(format!("{} has no catalog id", track.name));
        };
        let artists = track
            .artists
            .into_iter()
            .map(|a| Artist {
                id: a.id,
                name: a.name,
            })
            .collect();
        let album = track.album.map(|a| Album {
            id: a.id,
            name: a.name,
        });
        Ok(Song {
            id,
            name: track.name,
            album,
            artists,
        })
    }
}

impl From<SpotifySearchResponse> for Vec<Song> {
    /// Tracks that can't be liked are dropped.
    fn from(res: SpotifySearchResponse) -> Self {
        res.tracks
            .items
            .into_iter()
            .filter_map(|track| Song::try_from(track).ok())
            .collect()
    }
}
