use std::collections::HashMap;

use super::{AudioFeatures, Catalog, GenreQuery, Result, TrackRef};
use crate::db::Database;

/// Wraps a catalog and serves artist genres and audio features from the
/// local cache while they are younger than the TTL. Playlist reads, searches
/// and writes always go to the inner catalog.
pub struct CachedCatalog<C> {
    inner: C,
    db: Database,
    ttl_days: i64,
    hits: usize,
    misses: usize,
}

impl<C: Catalog> CachedCatalog<C> {
    pub fn new(inner: C, db: Database, ttl_days: i64) -> Self {
        Self {
            inner,
            db,
            ttl_days,
            hits: 0,
            misses: 0,
        }
    }

    /// (hits, misses) counted per looked-up id.
    pub fn hit_counts(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Catalog> Catalog for CachedCatalog<C> {
    fn playlist_tracks(&mut self, playlist_id: &str) -> Result<Vec<TrackRef>> {
        self.inner.playlist_tracks(playlist_id)
    }

    fn artist_genres(&mut self, artist_id: &str) -> Result<Vec<String>> {
        if let Some(genres) = self.db.get_cached_artist_genres(artist_id, self.ttl_days)? {
            self.hits += 1;
            return Ok(genres);
        }
        self.misses += 1;
        let genres = self.inner.artist_genres(artist_id)?;
        self.db.store_artist_genres(artist_id, &genres)?;
        Ok(genres)
    }

    fn audio_features(&mut self, track_ids: &[String]) -> Result<HashMap<String, AudioFeatures>> {
        let mut found = self.db.get_cached_features(track_ids, self.ttl_days)?;
        let missing: Vec<String> = track_ids
            .iter()
            .filter(|id| !found.contains_key(*id))
            .cloned()
            .collect();
        self.hits += found.len();
        self.misses += missing.len();

        if !missing.is_empty() {
            let fetched = self.inner.audio_features(&missing)?;
            self.db.store_features(&fetched)?;
            found.extend(fetched);
        }
        log::debug!(
            "Audio features: {} requested, {} from cache",
            track_ids.len(),
            track_ids.len() - missing.len()
        );
        Ok(found)
    }

    fn search_tracks(&mut self, query: &GenreQuery, limit: usize) -> Result<Vec<TrackRef>> {
        self.inner.search_tracks(query, limit)
    }

    fn replace_playlist_tracks(&mut self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        self.inner.replace_playlist_tracks(playlist_id, track_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts how often lookups reach it.
    #[derive(Default)]
    struct CountingCatalog {
        genre_calls: usize,
        feature_ids_requested: Vec<String>,
    }

    impl Catalog for CountingCatalog {
        fn playlist_tracks(&mut self, _playlist_id: &str) -> Result<Vec<TrackRef>> {
            Ok(vec![])
        }

        fn artist_genres(&mut self, artist_id: &str) -> Result<Vec<String>> {
            self.genre_calls += 1;
            Ok(vec![format!("{artist_id}-core")])
        }

        fn audio_features(
            &mut self,
            track_ids: &[String],
        ) -> Result<HashMap<String, AudioFeatures>> {
            self.feature_ids_requested.extend(track_ids.iter().cloned());
            Ok(track_ids
                .iter()
                .filter(|id| id.as_str() != "no-features")
                .map(|id| (id.clone(), AudioFeatures { danceability: 0.5, energy: 0.4 }))
                .collect())
        }

        fn search_tracks(&mut self, _query: &GenreQuery, _limit: usize) -> Result<Vec<TrackRef>> {
            Ok(vec![])
        }

        fn replace_playlist_tracks(
            &mut self,
            _playlist_id: &str,
            _track_ids: &[String],
        ) -> Result<()> {
            Ok(())
        }
    }

    fn cached() -> CachedCatalog<CountingCatalog> {
        CachedCatalog::new(CountingCatalog::default(), Database::open_in_memory().unwrap(), 30)
    }

    #[test]
    fn test_artist_genres_fetched_once() {
        let mut catalog = cached();
        assert_eq!(catalog.artist_genres("a1").unwrap(), vec!["a1-core"]);
        assert_eq!(catalog.artist_genres("a1").unwrap(), vec!["a1-core"]);
        assert_eq!(catalog.hit_counts(), (1, 1));
        assert_eq!(catalog.into_inner().genre_calls, 1);
    }

    #[test]
    fn test_features_only_fetch_missing_ids() {
        let mut catalog = cached();
        catalog.audio_features(&["t1".to_string()]).unwrap();

        let ids = vec!["t1".to_string(), "t2".to_string(), "no-features".to_string()];
        let got = catalog.audio_features(&ids).unwrap();
        assert_eq!(got.len(), 2);
        assert!(!got.contains_key("no-features"));

        let inner = catalog.into_inner();
        assert_eq!(inner.feature_ids_requested, vec!["t1", "t2", "no-features"]);
    }
}
