use std::collections::HashMap;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use ureq::Body;
use ureq::http::Response;

use super::backoff::{RateLimiter, parse_retry_after};
use super::{AudioFeatures, Catalog, CatalogError, GenreQuery, Result, TrackRef};
use crate::auth::{Credentials, Session};

const API_BASE: &str = "https://api.spotify.com/v1";

/// Most ids the audio-features endpoint accepts per request.
const FEATURES_BATCH: usize = 100;

/// Most uris a single playlist add/replace request accepts.
const PLAYLIST_WRITE_BATCH: usize = 100;

/// Search endpoint page size ceiling.
const MAX_SEARCH_LIMIT: usize = 50;

/// Query used when no genre filter is requested. Spotify rejects an empty
/// `q`, and an all-years range matches every track.
const UNCONSTRAINED_QUERY: &str = "year:0000-9999";

#[derive(Debug, Deserialize)]
struct PlaylistTracksPage {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// Null for removed or unavailable tracks.
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    /// Null for local files.
    id: Option<String>,
    #[serde(default)]
    artists: Vec<ApiArtistRef>,
}

#[derive(Debug, Deserialize)]
struct ApiArtistRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistResponse {
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    #[serde(default)]
    audio_features: Vec<Option<ApiFeatures>>,
}

#[derive(Debug, Deserialize)]
struct ApiFeatures {
    id: String,
    danceability: f64,
    energy: f64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    #[serde(default)]
    items: Vec<ApiTrack>,
}

impl ApiTrack {
    fn into_track_ref(self) -> Option<TrackRef> {
        let id = self.id?;
        let artist_id = self.artists.into_iter().next().and_then(|a| a.id);
        Some(TrackRef { id, artist_id })
    }
}

/// HTTP settings for the Spotify client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub rate_limit_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            rate_limit_ms: 100,
        }
    }
}

/// Build the blocking HTTP agent shared by authentication and catalog calls.
/// Non-2xx statuses are returned as responses so the client can tell
/// throttling and auth failures apart.
pub fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

/// Spotify Web API catalog.
pub struct SpotifyCatalog {
    agent: ureq::Agent,
    creds: Credentials,
    session: Session,
    limiter: RateLimiter,
    max_retries: u32,
}

impl SpotifyCatalog {
    pub fn new(
        agent: ureq::Agent,
        creds: Credentials,
        session: Session,
        options: &ClientOptions,
    ) -> Self {
        Self {
            agent,
            creds,
            session,
            limiter: RateLimiter::from_millis("spotify", options.rate_limit_ms),
            max_retries: options.max_retries,
        }
    }

    /// Send a request, pacing it and retrying on throttling. Returns the
    /// response body of the first 2xx answer.
    fn send<F>(&mut self, endpoint: &str, request: F) -> Result<String>
    where
        F: Fn(&ureq::Agent, &str) -> std::result::Result<Response<Body>, ureq::Error>,
    {
        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            self.session.ensure_fresh(&self.agent, &self.creds)?;
            let bearer = self.session.bearer()?;

            self.limiter.wait_if_needed();
            log::trace!("{endpoint} (attempt {attempt})");
            let mut response = request(&self.agent, &bearer)?;
            let status = response.status().as_u16();

            match disposition(status, attempt, attempts) {
                Disposition::Success => {
                    self.limiter.report_success();
                    return Ok(response.body_mut().read_to_string()?);
                }
                Disposition::Unauthorized => {
                    return Err(reject_session(&mut self.session, endpoint));
                }
                Disposition::Retry => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after);
                    let wait = self.limiter.report_throttled(retry_after);
                    thread::sleep(wait);
                }
                Disposition::Exhausted => break,
                Disposition::Failed => {
                    let body = response.body_mut().read_to_string().unwrap_or_default();
                    return Err(CatalogError::Status {
                        status,
                        endpoint: endpoint.to_string(),
                        body,
                    });
                }
            }
        }
        Err(CatalogError::RateLimited { attempts })
    }

    fn get_json<T: DeserializeOwned>(
        &mut self,
        endpoint: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let body = self.send(endpoint, |agent, bearer| {
            let mut req = agent.get(url).header("Authorization", bearer);
            for (k, v) in query {
                req = req.query(k, v);
            }
            req.call()
        })?;
        decode(endpoint, &body)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| CatalogError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

impl Catalog for SpotifyCatalog {
    fn playlist_tracks(&mut self, playlist_id: &str) -> Result<Vec<TrackRef>> {
        let mut tracks = Vec::new();
        let mut skipped = 0usize;
        let mut url = format!("{API_BASE}/playlists/{playlist_id}/tracks");
        let mut query: Vec<(&str, &str)> = vec![
            ("limit", "100"),
            ("fields", "items(track(id,artists(id))),next"),
        ];

        loop {
            let page: PlaylistTracksPage = self.get_json("playlist tracks", &url, &query)?;
            for item in page.items {
                match item.track.and_then(ApiTrack::into_track_ref) {
                    Some(t) => tracks.push(t),
                    None => skipped += 1,
                }
            }
            // `next` already carries every query parameter
            match page.next {
                Some(next) => {
                    url = next;
                    query.clear();
                }
                None => break,
            }
        }

        if skipped > 0 {
            log::warn!("Skipped {skipped} playlist entries without a catalog track (local or removed)");
        }
        log::debug!("Playlist {playlist_id}: {} tracks", tracks.len());
        Ok(tracks)
    }

    fn artist_genres(&mut self, artist_id: &str) -> Result<Vec<String>> {
        let url = format!("{API_BASE}/artists/{artist_id}");
        let artist: ArtistResponse = self.get_json("artist", &url, &[])?;
        Ok(artist.genres)
    }

    fn audio_features(&mut self, track_ids: &[String]) -> Result<HashMap<String, AudioFeatures>> {
        let url = format!("{API_BASE}/audio-features");
        let mut out = HashMap::with_capacity(track_ids.len());

        for chunk in track_ids.chunks(FEATURES_BATCH) {
            let ids = chunk.join(",");
            let resp: AudioFeaturesResponse =
                self.get_json("audio features", &url, &[("ids", ids.as_str())])?;
            for f in resp.audio_features.into_iter().flatten() {
                out.insert(
                    f.id,
                    AudioFeatures {
                        danceability: f.danceability,
                        energy: f.energy,
                    },
                );
            }
        }

        Ok(out)
    }

    fn search_tracks(&mut self, query: &GenreQuery, limit: usize) -> Result<Vec<TrackRef>> {
        let q = search_expression(query);
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT).to_string();
        let url = format!("{API_BASE}/search");
        log::debug!("Searching: q={q} limit={limit}");

        let resp: SearchResponse = self.get_json(
            "search",
            &url,
            &[("q", q.as_str()), ("type", "track"), ("limit", limit.as_str())],
        )?;
        Ok(resp
            .tracks
            .items
            .into_iter()
            .filter_map(ApiTrack::into_track_ref)
            .collect())
    }

    fn replace_playlist_tracks(&mut self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        let url = format!("{API_BASE}/playlists/{playlist_id}/tracks");
        let uris: Vec<String> = track_ids.iter().map(|id| track_uri(id)).collect();

        for write in plan_writes(&uris) {
            let body = serde_json::json!({ "uris": write.uris() });
            match write {
                PlaylistWrite::Replace(_) => self.send("replace playlist", |agent, bearer| {
                    agent.put(&url).header("Authorization", bearer).send_json(&body)
                })?,
                PlaylistWrite::Append(_) => self.send("append playlist", |agent, bearer| {
                    agent.post(&url).header("Authorization", bearer).send_json(&body)
                })?,
            };
        }

        log::info!("Replaced playlist {playlist_id} with {} tracks", uris.len());
        Ok(())
    }
}

/// What `send` does with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    Unauthorized,
    Retry,
    Exhausted,
    Failed,
}

fn disposition(status: u16, attempt: u32, attempts: u32) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        401 => Disposition::Unauthorized,
        429 if attempt < attempts => Disposition::Retry,
        429 => Disposition::Exhausted,
        _ => Disposition::Failed,
    }
}

/// A rejected token ends the session; later requests fail fast.
fn reject_session(session: &mut Session, endpoint: &str) -> CatalogError {
    session.invalidate();
    CatalogError::Authentication(format!("{endpoint} rejected the access token"))
}

/// One request of a full playlist replace.
#[derive(Debug, PartialEq, Eq)]
enum PlaylistWrite<'a> {
    /// PUT: replaces everything (an empty slice clears the playlist).
    Replace(&'a [String]),
    /// POST: appends after the replace.
    Append(&'a [String]),
}

impl<'a> PlaylistWrite<'a> {
    fn uris(&self) -> &'a [String] {
        match self {
            PlaylistWrite::Replace(uris) | PlaylistWrite::Append(uris) => *uris,
        }
    }
}

fn plan_writes(uris: &[String]) -> Vec<PlaylistWrite<'_>> {
    let mut chunks = uris.chunks(PLAYLIST_WRITE_BATCH);
    let mut writes = vec![PlaylistWrite::Replace(chunks.next().unwrap_or(&[]))];
    writes.extend(chunks.map(PlaylistWrite::Append));
    writes
}

fn search_expression(query: &GenreQuery) -> String {
    if query.is_unconstrained() {
        UNCONSTRAINED_QUERY.to_string()
    } else {
        query.expression()
    }
}

/// Track id to `spotify:track:` uri. Uris pass through unchanged.
pub fn track_uri(id: &str) -> String {
    if id.starts_with("spotify:") {
        id.to_string()
    } else {
        format!("spotify:track:{id}")
    }
}

static PLAYLIST_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^spotify:playlist:([A-Za-z0-9]+)$").unwrap());
static PLAYLIST_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"open\.spotify\.com/(?:intl-[a-z]+/)?playlist/([A-Za-z0-9]+)").unwrap()
});
static PLAYLIST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{22}$").unwrap());

/// Accept a bare playlist id, a `spotify:playlist:` uri, or an
/// `open.spotify.com/playlist/` URL and return the bare id.
pub fn parse_playlist_id(input: &str) -> Result<String> {
    let trimmed = input.trim();

    if let Some(caps) = PLAYLIST_URI_RE.captures(trimmed) {
        return Ok(caps[1].to_string());
    }
    if let Some(caps) = PLAYLIST_URL_RE.captures(trimmed) {
        return Ok(caps[1].to_string());
    }
    if PLAYLIST_ID_RE.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(CatalogError::InvalidPlaylistId(input.to_string()))
}
