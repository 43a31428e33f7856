use std::collections::HashMap;

use crate::catalog::{AudioFeatures, Catalog, GenreQuery, Result as CatalogResult};

/// Candidates requested per search round.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Slack on band comparisons so decimal targets behave as written
/// (0.65 ± 0.1 accepts 0.55).
const BAND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureTarget {
    pub danceability: f64,
    pub energy: f64,
}

/// Allowed deviation around the target on each feature axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceBand {
    pub danceability_radius: f64,
    pub energy_radius: f64,
}

impl ToleranceBand {
    pub fn uniform(radius: f64) -> Self {
        Self {
            danceability_radius: radius,
            energy_radius: radius,
        }
    }

    pub fn contains(&self, target: &FeatureTarget, features: &AudioFeatures) -> bool {
        let danceability_gap = (features.danceability - target.danceability).abs();
        let energy_gap = (features.energy - target.energy).abs();
        danceability_gap <= self.danceability_radius + BAND_EPSILON
            && energy_gap <= self.energy_radius + BAND_EPSILON
    }
}

/// How the band grows between rounds and when the search gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct WideningPolicy {
    pub initial_radius: f64,
    pub radius_step: f64,
    /// Once a round has searched at this radius the band covers the whole
    /// [0, 1] feature range, so no further round can find anything new.
    pub max_radius: f64,
    pub max_rounds: usize,
}

impl Default for WideningPolicy {
    fn default() -> Self {
        Self {
            initial_radius: 0.1,
            radius_step: 0.1,
            max_radius: 1.0,
            max_rounds: 10,
        }
    }
}

impl WideningPolicy {
    /// Band for a zero-based round. Computed from the round index so
    /// repeated widening never accumulates float error.
    pub fn band(&self, round: usize) -> ToleranceBand {
        ToleranceBand::uniform(self.initial_radius + self.radius_step * round as f64)
    }

    fn exhausted_at(&self, band: &ToleranceBand) -> bool {
        band.danceability_radius + BAND_EPSILON >= self.max_radius
            && band.energy_radius + BAND_EPSILON >= self.max_radius
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRequest {
    /// OR'ed genre filter. Empty means no genre filter.
    pub genres: Vec<String>,
    pub target: FeatureTarget,
    pub min_count: usize,
    pub page_size: usize,
}

impl MatchRequest {
    pub fn new(genres: Vec<String>, target: FeatureTarget, min_count: usize) -> Self {
        Self {
            genres,
            target,
            min_count,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One query-and-filter pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    /// 1-based.
    pub round: usize,
    pub band: ToleranceBand,
    pub candidates: usize,
    pub matched: usize,
    /// Size of the match set after this round.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Satisfied,
    /// The widening bound was hit before `wanted` matches were found.
    Insufficient { found: usize, wanted: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    /// Round-major, candidate order within a round. Not deduplicated.
    pub track_ids: Vec<String>,
    pub rounds: Vec<RoundSummary>,
    pub outcome: MatchOutcome,
}

impl MatchReport {
    pub fn is_satisfied(&self) -> bool {
        self.outcome == MatchOutcome::Satisfied
    }
}

/// Expanding-tolerance search: query the catalog for the request's genres,
/// keep candidates whose features fall inside the band, and widen the band
/// until at least `min_count` matches have accumulated or the policy's bound
/// is reached. Always runs at least one round.
pub fn find_matches<C>(
    catalog: &mut C,
    request: &MatchRequest,
    policy: &WideningPolicy,
) -> CatalogResult<MatchReport>
where
    C: Catalog + ?Sized,
{
    let query = GenreQuery::new(&request.genres);
    if query.is_unconstrained() {
        log::warn!("No genres given; searching without a genre filter");
    }

    let mut track_ids: Vec<String> = Vec::new();
    let mut rounds = Vec::new();

    for round in 0..policy.max_rounds.max(1) {
        let band = policy.band(round);
        let candidates = catalog.search_tracks(&query, request.page_size)?;
        let ids: Vec<String> = candidates.into_iter().map(|c| c.id).collect();

        let features: HashMap<String, AudioFeatures> = if ids.is_empty() {
            HashMap::new()
        } else {
            catalog.audio_features(&ids)?
        };

        let before = track_ids.len();
        let candidate_count = ids.len();
        for id in ids {
            let inside = features
                .get(&id)
                .is_some_and(|f| band.contains(&request.target, f));
            if inside {
                track_ids.push(id);
            }
        }

        let summary = RoundSummary {
            round: round + 1,
            band,
            candidates: candidate_count,
            matched: track_ids.len() - before,
            total: track_ids.len(),
        };
        log::info!(
            "Round {} (radius {:.2}): {}/{} candidates matched, {} total",
            summary.round,
            band.danceability_radius,
            summary.matched,
            summary.candidates,
            summary.total
        );
        rounds.push(summary);

        if track_ids.len() >= request.min_count {
            return Ok(MatchReport {
                track_ids,
                rounds,
                outcome: MatchOutcome::Satisfied,
            });
        }
        if policy.exhausted_at(&band) {
            log::debug!("Band covers the full feature range; stopping");
            break;
        }
    }

    let found = track_ids.len();
    log::warn!(
        "Found only {found} of {} requested tracks after {} rounds",
        request.min_count,
        rounds.len()
    );
    Ok(MatchReport {
        track_ids,
        rounds,
        outcome: MatchOutcome::Insufficient {
            found,
            wanted: request.min_count,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrackRef;

    /// Serves scripted search pages (the last page repeats once the script
    /// runs out) and a fixed feature table.
    #[derive(Default)]
    struct ScriptedCatalog {
        pages: Vec<Vec<TrackRef>>,
        features: HashMap<String, AudioFeatures>,
        searches: Vec<(GenreQuery, usize)>,
    }

    impl ScriptedCatalog {
        fn page(&mut self, tracks: &[(&str, f64, f64)]) -> &mut Self {
            let mut page = Vec::new();
            for &(id, d, e) in tracks {
                page.push(TrackRef::new(id, Some("artist")));
                self.features.insert(id.to_string(), AudioFeatures { danceability: d, energy: e });
            }
            self.pages.push(page);
            self
        }
    }

    impl Catalog for ScriptedCatalog {
        fn playlist_tracks(&mut self, _playlist_id: &str) -> CatalogResult<Vec<TrackRef>> {
            Ok(vec![])
        }

        fn artist_genres(&mut self, _artist_id: &str) -> CatalogResult<Vec<String>> {
            Ok(vec![])
        }

        fn audio_features(
            &mut self,
            track_ids: &[String],
        ) -> CatalogResult<HashMap<String, AudioFeatures>> {
            Ok(track_ids
                .iter()
                .filter_map(|id| self.features.get(id).map(|f| (id.clone(), *f)))
                .collect())
        }

        fn search_tracks(
            &mut self,
            query: &GenreQuery,
            limit: usize,
        ) -> CatalogResult<Vec<TrackRef>> {
            let n = self.searches.len();
            self.searches.push((query.clone(), limit));
            let page = match self.pages.len() {
                0 => Vec::new(),
                len => self.pages[n.min(len - 1)].clone(),
            };
            Ok(page.into_iter().take(limit).collect())
        }

        fn replace_playlist_tracks(
            &mut self,
            _playlist_id: &str,
            _track_ids: &[String],
        ) -> CatalogResult<()> {
            Ok(())
        }
    }

    fn run(catalog: &mut ScriptedCatalog, request: &MatchRequest) -> MatchReport {
        find_matches(catalog, request, &WideningPolicy::default()).unwrap()
    }

    fn request(genres: &[&str], d: f64, e: f64, min_count: usize) -> MatchRequest {
        MatchRequest::new(
            genres.iter().map(|g| g.to_string()).collect(),
            FeatureTarget { danceability: d, energy: e },
            min_count,
        )
    }

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn test_band_contains_edges() {
        let target = FeatureTarget { danceability: 0.65, energy: 0.55 };
        let band = ToleranceBand::uniform(0.1);
        let f = |d, e| AudioFeatures { danceability: d, energy: e };

        assert!(band.contains(&target, &f(0.55, 0.65)));
        assert!(band.contains(&target, &f(0.75, 0.45)));
        assert!(!band.contains(&target, &f(0.76, 0.55)));
        assert!(!band.contains(&target, &f(0.65, 0.44)));
    }

    #[test]
    fn test_policy_bands_grow_by_step() {
        let policy = WideningPolicy::default();
        for round in 0..10 {
            let expected = 0.1 * (round + 1) as f64;
            assert!((policy.band(round).danceability_radius - expected).abs() < 1e-12);
            assert!((policy.band(round).energy_radius - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_single_round_when_first_band_suffices() {
        let mut catalog = ScriptedCatalog::default();
        catalog.page(&[
            ("in1", 0.50, 0.50),
            ("far1", 0.90, 0.50),
            ("in2", 0.55, 0.45),
            ("far2", 0.50, 0.05),
            ("in3", 0.42, 0.58),
            ("nofeat", 0.50, 0.50),
        ]);
        catalog.features.remove("nofeat");

        let report = run(&mut catalog, &request(&["house"], 0.5, 0.5, 3));

        assert!(report.is_satisfied());
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.track_ids, vec!["in1", "in2", "in3"]);
        assert_eq!(catalog.searches.len(), 1);
        assert_eq!(catalog.searches[0].1, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_widening_is_monotonic() {
        // Same pool every round; each track sits at a different distance.
        let mut catalog = ScriptedCatalog::default();
        catalog.page(&[
            ("d05", 0.55, 0.50),
            ("d15", 0.65, 0.50),
            ("d25", 0.50, 0.75),
            ("d35", 0.15, 0.50),
        ]);

        let report = run(&mut catalog, &request(&["jazz"], 0.5, 0.5, 8));

        assert!(report.is_satisfied());
        let radii: Vec<f64> = report.rounds.iter().map(|r| r.band.danceability_radius).collect();
        for pair in radii.windows(2) {
            assert!((pair[1] - pair[0] - 0.1).abs() < 1e-9);
        }
        for pair in report.rounds.windows(2) {
            assert!(pair[1].total >= pair[0].total);
        }
        // cumulative matches: 1, 3, 6, 10 -> stops in round 4
        let totals: Vec<usize> = report.rounds.iter().map(|r| r.total).collect();
        assert_eq!(totals, vec![1, 3, 6, 10]);
        // earlier matches are re-added in later rounds, not deduplicated
        assert_eq!(report.track_ids.iter().filter(|id| *id == "d05").count(), 4);
    }

    #[test]
    fn test_terminates_when_nothing_is_ever_eligible() {
        let mut catalog = ScriptedCatalog::default();

        let report = run(&mut catalog, &request(&["polka"], 0.5, 0.5, 5));

        assert_eq!(report.outcome, MatchOutcome::Insufficient { found: 0, wanted: 5 });
        assert!(report.track_ids.is_empty());
        assert_eq!(report.rounds.len(), 10);
        assert!((report.rounds.last().unwrap().band.danceability_radius - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_rounds_bounds_search_with_partial_results() {
        let mut catalog = ScriptedCatalog::default();
        catalog.page(&[("a", 0.5, 0.5), ("b", 0.52, 0.48)]);
        let policy = WideningPolicy { max_rounds: 3, ..WideningPolicy::default() };

        let report =
            find_matches(&mut catalog, &request(&["polka"], 0.5, 0.5, 100), &policy).unwrap();

        assert_eq!(report.rounds.len(), 3);
        assert_eq!(report.outcome, MatchOutcome::Insufficient { found: 6, wanted: 100 });
        assert_eq!(report.track_ids.len(), 6);
    }

    #[test]
    fn test_zero_max_rounds_still_runs_once() {
        let mut catalog = ScriptedCatalog::default();
        catalog.page(&[("a", 0.5, 0.5)]);
        let policy = WideningPolicy { max_rounds: 0, ..WideningPolicy::default() };

        let report = find_matches(&mut catalog, &request(&["x"], 0.5, 0.5, 1), &policy).unwrap();
        assert_eq!(report.rounds.len(), 1);
        assert!(report.is_satisfied());
    }

    #[test]
    fn test_min_count_zero_runs_one_round() {
        let mut catalog = ScriptedCatalog::default();
        catalog.page(&[("a", 0.9, 0.9)]);

        let report = run(&mut catalog, &request(&["x"], 0.1, 0.1, 0));
        assert!(report.is_satisfied());
        assert_eq!(report.rounds.len(), 1);
        assert!(report.track_ids.is_empty());
    }

    #[test]
    fn test_genres_are_or_combined_and_empty_means_unfiltered() {
        let mut catalog = ScriptedCatalog::default();
        catalog.page(&[("a", 0.5, 0.5)]);

        run(&mut catalog, &request(&["indie pop", "chamber pop"], 0.5, 0.5, 1));
        assert_eq!(
            catalog.searches[0].0.expression(),
            "genre:\"indie pop\" OR genre:\"chamber pop\""
        );

        let report = run(&mut catalog, &request(&[], 0.5, 0.5, 1));
        assert!(catalog.searches[1].0.is_unconstrained());
        assert_eq!(report.track_ids, vec!["a"]);
    }

    #[test]
    fn test_page_size_is_passed_through() {
        let mut catalog = ScriptedCatalog::default();
        catalog.page(&[("a", 0.5, 0.5), ("b", 0.5, 0.5), ("c", 0.5, 0.5)]);
        let mut req = request(&["x"], 0.5, 0.5, 1);
        req.page_size = 2;

        let report = run(&mut catalog, &req);
        assert_eq!(catalog.searches[0].1, 2);
        assert_eq!(report.rounds[0].candidates, 2);
    }

    #[test]
    fn test_indie_pop_scenario_two_rounds() {
        // Round 1: 15 tracks within 0.1 of the target plus 5 far off.
        // Round 2: 10 new tracks 0.15 away, inside 0.2 but outside 0.1.
        let mut catalog = ScriptedCatalog::default();
        let round1_hits = ids("r1-", 15);
        let mut round1: Vec<(&str, f64, f64)> = round1_hits
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let d = 0.60 + (i % 3) as f64 * 0.05;
                let e = 0.50 + (i % 2) as f64 * 0.05;
                (id.as_str(), d, e)
            })
            .collect();
        let far = ids("far-", 5);
        round1.extend(far.iter().map(|id| (id.as_str(), 0.10, 0.95)));
        catalog.page(&round1);

        let round2_hits = ids("r2-", 10);
        let round2: Vec<(&str, f64, f64)> =
            round2_hits.iter().map(|id| (id.as_str(), 0.80, 0.40)).collect();
        catalog.page(&round2);

        let report = find_matches(
            &mut catalog,
            &request(&["indie pop"], 0.65, 0.55, 20),
            &WideningPolicy::default(),
        )
        .unwrap();

        assert!(report.is_satisfied());
        assert_eq!(report.rounds.len(), 2);
        assert_eq!(report.track_ids.len(), 25);
        assert_eq!(&report.track_ids[..15], round1_hits.as_slice());
        assert_eq!(&report.track_ids[15..], round2_hits.as_slice());
        assert_eq!(report.rounds[0].matched, 15);
        assert_eq!(report.rounds[1].matched, 10);
    }
}
