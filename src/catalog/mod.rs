pub mod backoff;
pub mod cached;
pub mod spotify;

use std::collections::HashMap;

use thiserror::Error;

pub use cached::CachedCatalog;
pub use spotify::SpotifyCatalog;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("Catalog returned {status} for {endpoint}: {body}")]
    Status {
        status: u16,
        endpoint: String,
        body: String,
    },
    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("Rate limited by catalog after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("Invalid playlist identifier: {0}")]
    InvalidPlaylistId(String),
    #[error("Cache error: {0}")]
    Cache(#[from] crate::db::DbError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// A track as listed by a playlist read or a search: its id plus the id of
/// its primary (first-credited) artist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub id: String,
    pub artist_id: Option<String>,
}

impl TrackRef {
    pub fn new(id: impl Into<String>, artist_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            artist_id: artist_id.map(str::to_string),
        }
    }
}

/// The two audio features the profile and matcher work with, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFeatures {
    pub danceability: f64,
    pub energy: f64,
}

/// A search over genres combined with logical OR.
/// No genres means no genre filter at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenreQuery {
    genres: Vec<String>,
}

impl GenreQuery {
    pub fn new<I, S>(genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for g in genres {
            let g = g.as_ref().trim();
            if !g.is_empty() && !out.iter().any(|existing| existing == g) {
                out.push(g.to_string());
            }
        }
        Self { genres: out }
    }

    pub fn genres(&self) -> &[String] {
        &self.genres
    }

    pub fn is_unconstrained(&self) -> bool {
        self.genres.is_empty()
    }

    /// Render as a catalog search expression: `genre:"a" OR genre:"b"`.
    /// Empty when unconstrained.
    pub fn expression(&self) -> String {
        self.genres
            .iter()
            .map(|g| format!("genre:\"{}\"", g.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// Remote music catalog the profile extractor, matcher and playlist update
/// talk to. Every call blocks until the catalog answers or fails.
pub trait Catalog {
    /// All tracks currently in the playlist, in playlist order.
    fn playlist_tracks(&mut self, playlist_id: &str) -> Result<Vec<TrackRef>>;

    /// Genre labels of an artist. May be empty.
    fn artist_genres(&mut self, artist_id: &str) -> Result<Vec<String>>;

    /// Batch feature lookup. Tracks the catalog has no features for are
    /// absent from the returned map.
    fn audio_features(&mut self, track_ids: &[String]) -> Result<HashMap<String, AudioFeatures>>;

    /// A single page of at most `limit` tracks matching the query.
    fn search_tracks(&mut self, query: &GenreQuery, limit: usize) -> Result<Vec<TrackRef>>;

    /// Replace the playlist's contents. An empty slice clears it.
    fn replace_playlist_tracks(&mut self, playlist_id: &str, track_ids: &[String]) -> Result<()>;
}
