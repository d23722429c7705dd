use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::utils::{clean_song_name, normalize};

const ARTIST_FIELDS: &[&str] = &["artist", "artistName"];
const TITLE_FIELDS: &[&str] = &["title", "name", "trackName", "songName"];
const ALBUM_FIELDS: &[&str] = &["album", "albumName"];
const PLAYED_AT_FIELDS: &[&str] = &["playedAt", "played_at", "timestamp"];

// epoch values at or above this are read as milliseconds
const EPOCH_MILLIS_CUTOFF: f64 = 1e11;

/// One scrobbled play, as decoded from the input document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceTrack {
    pub artist: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
}

impl SourceTrack {
    /// Key shared by plays of the same song, used to match each song only once.
    pub fn dedup_key(&self) -> String {
        let album = self.album.as_deref().map(normalize).unwrap_or_default();
        format!(
            "{}\u{1f}{}\u{1f}{}",
            normalize(&self.artist),
            normalize(&clean_song_name(&self.title)),
            album
        )
    }
}

/// Decode a scrobble export into tracks, preserving document order.
pub fn decode(bytes: &[u8]) -> Result<Vec<SourceTrack>, DecodeError> {
    let document: Value = serde_json::from_slice(bytes)?;
    let Value::Array(items) = document else {
        return Err(DecodeError::NotAnArray);
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(obj) = item else {
                return Err(DecodeError::NotAnObject { index });
            };
            decode_record(index, obj)
        })
        .collect()
}

fn decode_record(index: usize, obj: &Map<String, Value>) -> Result<SourceTrack, DecodeError> {
    let artist = string_field(index, obj, "artist", ARTIST_FIELDS)?
        .ok_or(DecodeError::MissingField { index, field: "artist" })?;
    let title = string_field(index, obj, "title", TITLE_FIELDS)?
        .ok_or(DecodeError::MissingField { index, field: "title" })?;
    let album = string_field(index, obj, "album", ALBUM_FIELDS)?;

    let played_at = match lookup(obj, PLAYED_AT_FIELDS) {
        None => None,
        Some(value) => Some(parse_played_at(value).map_err(|reason| DecodeError::InvalidField {
            index,
            field: "playedAt",
            reason,
        })?),
    };

    Ok(SourceTrack {
        artist,
        title,
        album,
        played_at,
    })
}

fn lookup<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

/// A trimmed, non-empty string. Empty strings count as absent.
fn string_field(
    index: usize,
    obj: &Map<String, Value>,
    field: &'static str,
    names: &[&str],
) -> Result<Option<String>, DecodeError> {
    match lookup(obj, names) {
        None => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(other) => Err(DecodeError::InvalidField {
            index,
            field,
            reason: format!("expected a string, got `{other}`"),
        }),
    }
}

fn parse_played_at(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::Number(n) => {
            let epoch = n
                .as_f64()
                .ok_or_else(|| format!("unrepresentable number `{n}`"))?;
            from_epoch(epoch)
        }
        Value::String(s) => parse_timestamp(s.trim()),
        other => Err(format!("expected a timestamp, got `{other}`")),
    }
}

fn from_epoch(epoch: f64) -> Result<DateTime<Utc>, String> {
    let millis = if epoch.abs() >= EPOCH_MILLIS_CUTOFF {
        epoch
    } else {
        epoch * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
        .ok_or_else(|| format!("epoch `{epoch}` is out of range"))
}

/// Accepts RFC 3339, offset-less ISO-8601 (read as UTC), bare dates and
/// epoch numbers written as strings.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(epoch) = s.parse::<f64>() {
        return from_epoch(epoch);
    }
    Err(format!("unrecognized timestamp `{s}`"))
}
