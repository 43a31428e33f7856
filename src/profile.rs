use std::collections::HashMap;

use thiserror::Error;

use crate::catalog::{AudioFeatures, Catalog, Result as CatalogResult};

/// Number of top genres kept in a profile unless configured otherwise.
pub const DEFAULT_TOP_GENRES: usize = 5;

/// Feature lookups per progress callback / request batch.
const FEATURE_BATCH: usize = 100;

#[derive(Error, Debug, PartialEq)]
pub enum ProfileError {
    #[error("Playlist has no tracks with audio features; cannot compute a profile")]
    EmptyPlaylist,
}

/// A playlist track with everything the profile needs resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfiledTrack {
    pub id: String,
    /// Genres of the track's primary artist.
    pub genres: Vec<String>,
    pub danceability: f64,
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistProfile {
    /// Most frequent first; equal counts keep first-seen order.
    pub top_genres: Vec<String>,
    /// Distinct genres extending the leading genre ("indie pop" → "indie pop rap").
    pub subgenres: Vec<String>,
    pub danceability: f64,
    pub energy: f64,
    pub track_count: usize,
}

/// A playlist as read for profiling.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistTracks {
    /// Every catalog track id in the playlist, in playlist order, including
    /// tracks that could not be profiled.
    pub members: Vec<String>,
    pub profiled: Vec<ProfiledTrack>,
}

impl PlaylistProfile {
    pub fn leading_genre(&self) -> Option<&str> {
        self.top_genres.first().map(String::as_str)
    }
}

/// Genre frequencies in first-seen order.
struct GenreTally {
    counts: Vec<(String, usize)>,
    index: HashMap<String, usize>,
}

impl GenreTally {
    fn new() -> Self {
        Self {
            counts: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn add(&mut self, genre: &str) {
        match self.index.get(genre) {
            Some(&i) => self.counts[i].1 += 1,
            None => {
                self.index.insert(genre.to_string(), self.counts.len());
                self.counts.push((genre.to_string(), 1));
            }
        }
    }

    /// Labels by descending count. The sort is stable, so ties stay in
    /// first-seen order.
    fn ranked(&self) -> Vec<(String, usize)> {
        let mut ranked = self.counts.clone();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }
}

/// Aggregate tracks into a profile: top `top_n` genres, mean danceability,
/// mean energy. Each track counts a genre at most once.
pub fn extract_profile(
    tracks: &[ProfiledTrack],
    top_n: usize,
) -> Result<PlaylistProfile, ProfileError> {
    if tracks.is_empty() {
        return Err(ProfileError::EmptyPlaylist);
    }

    let mut tally = GenreTally::new();
    for track in tracks {
        let mut seen: Vec<&str> = Vec::with_capacity(track.genres.len());
        for genre in &track.genres {
            if !seen.contains(&genre.as_str()) {
                seen.push(genre);
                tally.add(genre);
            }
        }
    }

    let top_genres: Vec<String> = tally
        .ranked()
        .into_iter()
        .take(top_n)
        .map(|(genre, _)| genre)
        .collect();

    let subgenres = match top_genres.first() {
        Some(leading) => tally
            .counts
            .iter()
            .map(|(genre, _)| genre)
            .filter(|g| *g != leading && g.starts_with(leading.as_str()))
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    let n = tracks.len() as f64;
    let danceability = tracks.iter().map(|t| t.danceability).sum::<f64>() / n;
    let energy = tracks.iter().map(|t| t.energy).sum::<f64>() / n;

    Ok(PlaylistProfile {
        top_genres,
        subgenres,
        danceability,
        energy,
        track_count: tracks.len(),
    })
}

/// Read a playlist and resolve each track's primary-artist genres and audio
/// features. Artists are looked up once each; features are fetched in
/// batches. Tracks without features are skipped.
///
/// `progress` is called with (done, total) after each feature batch.
pub fn collect_tracks<C, F>(
    catalog: &mut C,
    playlist_id: &str,
    mut progress: F,
) -> CatalogResult<PlaylistTracks>
where
    C: Catalog + ?Sized,
    F: FnMut(usize, usize),
{
    let refs = catalog.playlist_tracks(playlist_id)?;
    log::info!("Playlist {playlist_id} has {} tracks", refs.len());

    let mut genres_by_artist: HashMap<String, Vec<String>> = HashMap::new();
    for r in &refs {
        if let Some(artist) = &r.artist_id {
            if !genres_by_artist.contains_key(artist) {
                let genres = catalog.artist_genres(artist)?;
                genres_by_artist.insert(artist.clone(), genres);
            }
        }
    }

    let members: Vec<String> = refs.iter().map(|r| r.id.clone()).collect();
    let mut features: HashMap<String, AudioFeatures> = HashMap::with_capacity(members.len());
    let mut done = 0;
    for chunk in members.chunks(FEATURE_BATCH) {
        features.extend(catalog.audio_features(chunk)?);
        done += chunk.len();
        progress(done, members.len());
    }

    let mut tracks = Vec::with_capacity(refs.len());
    for r in refs {
        let Some(f) = features.get(&r.id) else {
            log::warn!("No audio features for track {}, skipping", r.id);
            continue;
        };
        let genres = r
            .artist_id
            .as_ref()
            .and_then(|a| genres_by_artist.get(a))
            .cloned()
            .unwrap_or_default();
        tracks.push(ProfiledTrack {
            id: r.id,
            genres,
            danceability: f.danceability,
            energy: f.energy,
        });
    }

    Ok(PlaylistTracks {
        members,
        profiled: tracks,
    })
}
