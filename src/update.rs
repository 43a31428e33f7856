use std::collections::HashSet;

use thiserror::Error;

use crate::catalog::{Catalog, CatalogError};
use crate::matcher::{
    self, FeatureTarget, MatchOutcome, MatchReport, MatchRequest, WideningPolicy,
};
use crate::profile::{self, PlaylistProfile, ProfileError};

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("Found only {found} of {wanted} matching tracks before the search bound was reached")]
    UnsatisfiableMatch { found: usize, wanted: usize },
}

pub type Result<T> = std::result::Result<T, UpdateError>;

/// Knobs for one refresh run.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOptions {
    pub top_genres: usize,
    pub min_count: usize,
    pub max_tracks: usize,
    pub page_size: usize,
    pub policy: WideningPolicy,
    /// Use a partial match set instead of failing when the search bound is hit.
    pub allow_partial: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            top_genres: profile::DEFAULT_TOP_GENRES,
            min_count: 20,
            max_tracks: 50,
            page_size: matcher::DEFAULT_PAGE_SIZE,
            policy: WideningPolicy::default(),
            allow_partial: false,
        }
    }
}

/// A playlist's current membership and its profile.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistAnalysis {
    pub playlist_id: String,
    pub members: Vec<String>,
    pub profile: PlaylistProfile,
}

/// What a refresh would do, computed before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPlan {
    pub report: MatchReport,
    /// Final contents for the playlist.
    pub replacement: Vec<String>,
    /// Matches dropped because the playlist already holds them.
    pub already_present: usize,
}

/// Read the playlist and compute its profile.
pub fn analyze_playlist<C, F>(
    catalog: &mut C,
    playlist_id: &str,
    top_genres: usize,
    progress: F,
) -> Result<PlaylistAnalysis>
where
    C: Catalog + ?Sized,
    F: FnMut(usize, usize),
{
    let tracks = profile::collect_tracks(catalog, playlist_id, progress)?;
    let profile = profile::extract_profile(&tracks.profiled, top_genres)?;
    Ok(PlaylistAnalysis {
        playlist_id: playlist_id.to_string(),
        members: tracks.members,
        profile,
    })
}

/// Search for tracks matching the analysis' profile and plan the new
/// playlist contents. Nothing is written.
pub fn plan_refresh<C>(
    catalog: &mut C,
    analysis: &PlaylistAnalysis,
    options: &RefreshOptions,
) -> Result<RefreshPlan>
where
    C: Catalog + ?Sized,
{
    let request = MatchRequest {
        genres: analysis.profile.top_genres.clone(),
        target: FeatureTarget {
            danceability: analysis.profile.danceability,
            energy: analysis.profile.energy,
        },
        min_count: options.min_count,
        page_size: options.page_size,
    };
    let report = matcher::find_matches(catalog, &request, &options.policy)?;

    if let MatchOutcome::Insufficient { found, wanted } = report.outcome {
        if !options.allow_partial {
            return Err(UpdateError::UnsatisfiableMatch { found, wanted });
        }
        log::warn!("Continuing with a partial match set ({found} of {wanted})");
    }

    let current: HashSet<String> = analysis.members.iter().cloned().collect();
    let already_present = report
        .track_ids
        .iter()
        .filter(|id| current.contains(*id))
        .collect::<HashSet<_>>()
        .len();
    let replacement = plan_replacement(&report.track_ids, &current, options.max_tracks);

    Ok(RefreshPlan {
        report,
        replacement,
        already_present,
    })
}

/// Drop matches already in the playlist and repeated matches (first
/// occurrence wins), then keep at most `max_tracks`.
pub fn plan_replacement(
    matches: &[String],
    current: &HashSet<String>,
    max_tracks: usize,
) -> Vec<String> {
    let mut seen: HashSet<&String> = HashSet::new();
    matches
        .iter()
        .filter(|id| !current.contains(*id))
        .filter(|id| seen.insert(*id))
        .take(max_tracks)
        .cloned()
        .collect()
}

/// Replace the playlist's contents with `tracks`. Previous contents are
/// discarded whether or not they overlap.
pub fn apply_replacement<C>(catalog: &mut C, playlist_id: &str, tracks: &[String]) -> Result<()>
where
    C: Catalog + ?Sized,
{
    catalog.replace_playlist_tracks(playlist_id, tracks)?;
    Ok(())
}
