use std::collections::HashMap;

use rusqlite::{OptionalExtension, params};

use super::models::CacheStats;
use super::{Database, Result};
use crate::catalog::AudioFeatures;

/// SQLite datetime modifier selecting rows younger than `ttl_days`.
fn ttl_modifier(ttl_days: i64) -> String {
    format!("-{} days", ttl_days.max(0))
}

impl Database {
    /// Cached genres for an artist, if fetched within the TTL.
    pub fn get_cached_artist_genres(
        &self,
        artist_id: &str,
        ttl_days: i64,
    ) -> Result<Option<Vec<String>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT genres FROM artist_genres
                 WHERE artist_id = ?1 AND fetched_at >= datetime('now', ?2)",
                params![artist_id, ttl_modifier(ttl_days)],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn store_artist_genres(&self, artist_id: &str, genres: &[String]) -> Result<()> {
        let json = serde_json::to_string(genres)?;
        self.conn.execute(
            "INSERT INTO artist_genres (artist_id, genres, fetched_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(artist_id) DO UPDATE SET
                genres = excluded.genres,
                fetched_at = excluded.fetched_at",
            params![artist_id, json],
        )?;
        Ok(())
    }

    /// Cached features for whichever of `track_ids` are present and fresh.
    pub fn get_cached_features(
        &self,
        track_ids: &[String],
        ttl_days: i64,
    ) -> Result<HashMap<String, AudioFeatures>> {
        let modifier = ttl_modifier(ttl_days);
        let mut stmt = self.conn.prepare_cached(
            "SELECT danceability, energy FROM audio_features
             WHERE track_id = ?1 AND fetched_at >= datetime('now', ?2)",
        )?;

        let mut out = HashMap::new();
        for id in track_ids {
            let found = stmt
                .query_row(params![id, modifier], |row| {
                    Ok(AudioFeatures {
                        danceability: row.get(0)?,
                        energy: row.get(1)?,
                    })
                })
                .optional()?;
            if let Some(features) = found {
                out.insert(id.clone(), features);
            }
        }
        Ok(out)
    }

    /// Store features in one transaction. Returns the number of rows written.
    pub fn store_features(&self, features: &HashMap<String, AudioFeatures>) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO audio_features (track_id, danceability, energy, fetched_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(track_id) DO UPDATE SET
                    danceability = excluded.danceability,
                    energy = excluded.energy,
                    fetched_at = excluded.fetched_at",
            )?;
            for (id, f) in features {
                stmt.execute(params![id, f.danceability, f.energy])?;
            }
        }
        tx.commit()?;
        Ok(features.len())
    }

    pub fn cache_stats(&self, ttl_days: i64) -> Result<CacheStats> {
        let modifier = ttl_modifier(ttl_days);
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        let count_fresh = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, params![modifier], |row| row.get(0))?)
        };

        Ok(CacheStats {
            artists: count("SELECT COUNT(*) FROM artist_genres")?,
            artists_fresh: count_fresh(
                "SELECT COUNT(*) FROM artist_genres WHERE fetched_at >= datetime('now', ?1)",
            )?,
            features: count("SELECT COUNT(*) FROM audio_features")?,
            features_fresh: count_fresh(
                "SELECT COUNT(*) FROM audio_features WHERE fetched_at >= datetime('now', ?1)",
            )?,
        })
    }

    /// Delete every cached lookup. Returns the number of rows removed.
    pub fn clear_cache(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let artists = tx.execute("DELETE FROM artist_genres", [])?;
        let features = tx.execute("DELETE FROM audio_features", [])?;
        tx.commit()?;
        Ok(artists + features)
    }
}
