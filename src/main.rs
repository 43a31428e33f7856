use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use playmatch::auth::{self, Credentials, Session};
use playmatch::catalog::spotify::{self, SpotifyCatalog};
use playmatch::catalog::{CachedCatalog, Catalog};
use playmatch::config::AppConfig;
use playmatch::db::Database;
use playmatch::matcher::MatchOutcome;
use playmatch::profile::PlaylistProfile;
use playmatch::update::{self, RefreshPlan};

#[derive(Parser)]
#[command(
    name = "playmatch",
    version,
    about = "Refill a playlist with tracks matching its genre, danceability and energy profile"
)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the lookup cache database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Don't read or write the lookup cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a playlist's genre, danceability and energy profile
    Analyze {
        /// Playlist id, URI or URL (prompted for if omitted)
        playlist: Option<String>,

        /// Number of top genres to report
        #[arg(long)]
        top: Option<usize>,
    },

    /// Replace a playlist's tracks with new tracks matching its profile
    Refresh {
        /// Playlist id, URI or URL (prompted for if omitted)
        playlist: Option<String>,

        /// Minimum number of matches to search for
        #[arg(long)]
        min_count: Option<usize>,

        /// Maximum number of tracks in the refreshed playlist
        #[arg(short = 'n', long)]
        max_tracks: Option<usize>,

        /// Proceed with fewer matches than requested
        #[arg(long)]
        allow_partial: bool,

        /// Show what would change without touching the playlist
        #[arg(long)]
        dry_run: bool,

        /// Don't ask for confirmation before replacing
        #[arg(short, long)]
        yes: bool,
    },

    /// Show lookup cache statistics
    CacheStats,

    /// Delete all cached lookups
    ClearCache,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load(cli.config.as_deref());

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .clone()
        .or(config.cache.db_path.clone())
        .unwrap_or_else(playmatch::config::default_db_path);
    let use_cache = config.cache.enabled && !cli.no_cache;

    match cli.command {
        Commands::CacheStats => {
            let db = Database::open(&db_path).context("Failed to open cache database")?;
            let stats = db.cache_stats(config.cache.ttl_days).context("Query failed")?;
            println!("Lookup cache: {}", db_path.display());
            println!("==================");
            println!("Artists:          {} ({} fresh)", stats.artists, stats.artists_fresh);
            println!("Audio features:   {} ({} fresh)", stats.features, stats.features_fresh);
            println!("TTL:              {} days", config.cache.ttl_days);
        }

        Commands::ClearCache => {
            let db = Database::open(&db_path).context("Failed to open cache database")?;
            let removed = db.clear_cache().context("Failed to clear cache")?;
            println!("Cleared {removed} cached lookups");
        }

        Commands::Analyze { playlist, top } => {
            let playlist_id = resolve_playlist(playlist)?;
            let top_n = top.unwrap_or(config.matching.top_genres);

            with_catalog(&config, use_cache.then_some(db_path.as_path()), |catalog| {
                let analysis = analyze_with_progress(catalog, &playlist_id, top_n)?;
                print_profile(&analysis.profile);
                Ok(())
            })?;
        }

        Commands::Refresh { playlist, min_count, max_tracks, allow_partial, dry_run, yes } => {
            let mut options = config.refresh_options();
            if let Some(n) = min_count {
                options.min_count = n;
            }
            if let Some(n) = max_tracks {
                options.max_tracks = n;
            }
            options.allow_partial |= allow_partial;

            let playlist_id = resolve_playlist(playlist)?;

            with_catalog(&config, use_cache.then_some(db_path.as_path()), |catalog| {
                let analysis = analyze_with_progress(catalog, &playlist_id, options.top_genres)?;
                print_profile(&analysis.profile);
                println!();

                let spinner = ProgressBar::new_spinner();
                spinner.set_message(format!(
                    "Searching for {} tracks like this playlist...",
                    options.min_count
                ));
                spinner.enable_steady_tick(std::time::Duration::from_millis(120));
                let plan = update::plan_refresh(catalog, &analysis, &options);
                spinner.finish_and_clear();
                let plan = plan.context("Search failed")?;

                print_plan(&plan);

                if dry_run {
                    println!("(dry run — re-run without --dry-run to replace the playlist)");
                    return Ok(());
                }

                if !yes
                    && !confirm(&format!(
                        "Replace all {} tracks in the playlist with these {} tracks?",
                        analysis.members.len(),
                        plan.replacement.len()
                    ))?
                {
                    println!("Playlist update cancelled.");
                    return Ok(());
                }

                update::apply_replacement(catalog, &playlist_id, &plan.replacement)
                    .context("Failed to update playlist")?;
                println!("Playlist update complete: {} tracks", plan.replacement.len());
                Ok(())
            })?;
        }
    }

    Ok(())
}

/// Authenticate against Spotify and run `job` against the catalog, wrapped
/// in the lookup cache when `cache_path` is given.
fn with_catalog<F>(config: &AppConfig, cache_path: Option<&Path>, job: F) -> Result<()>
where
    F: FnOnce(&mut dyn Catalog) -> Result<()>,
{
    let mut catalog = connect(config)?;

    match cache_path {
        Some(path) => {
            log::info!("Lookup cache: {}", path.display());
            let db = Database::open(path).context("Failed to open cache database")?;
            let mut cached = CachedCatalog::new(catalog, db, config.cache.ttl_days);
            let result = job(&mut cached);
            let (hits, misses) = cached.hit_counts();
            log::info!("Lookup cache: {hits} hits, {misses} misses");
            result
        }
        None => job(&mut catalog),
    }
}

fn connect(config: &AppConfig) -> Result<SpotifyCatalog> {
    let creds = Credentials {
        client_id: configured_or_prompt(&config.spotify.client_id, "Spotify API Client ID")?,
        client_secret: configured_or_prompt(
            &config.spotify.client_secret,
            "Spotify API Client Secret",
        )?,
        redirect_uri: configured_or_prompt(
            &config.spotify.redirect_uri,
            "Spotify API Redirect URI",
        )?,
    };

    let options = config.client_options();
    let agent = spotify::build_agent(options.timeout);

    let state = auth::new_state();
    println!("Open this URL in a browser and grant access:");
    println!();
    println!("  {}", auth::authorize_url(&creds, &state));
    println!();
    let redirected = prompt("Paste the URL you were redirected to")?;
    let code = auth::extract_code(&redirected, &state).context("Authentication failed")?;
    let session = Session::acquire(&agent, &creds, &code).context("Authentication failed")?;

    Ok(SpotifyCatalog::new(agent, creds, session, &options))
}

fn analyze_with_progress(
    catalog: &mut dyn Catalog,
    playlist_id: &str,
    top_n: usize,
) -> Result<update::PlaylistAnalysis> {
    println!("Analyzing the playlist, please wait...");
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} tracks")
            .unwrap()
            .progress_chars("=>-"),
    );
    let analysis = update::analyze_playlist(catalog, playlist_id, top_n, |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();
    let analysis = analysis.context("Playlist analysis failed")?;
    println!("Playlist analysis complete.");
    println!();
    Ok(analysis)
}

fn resolve_playlist(arg: Option<String>) -> Result<String> {
    let raw = match arg {
        Some(p) => p,
        None => prompt("Spotify Playlist ID or URL")?,
    };
    Ok(spotify::parse_playlist_id(&raw)?)
}

fn configured_or_prompt(value: &Option<String>, label: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => prompt(label),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line).context("Failed to read input")?;
    if read == 0 {
        anyhow::bail!("No input for {label}");
    }
    let value = line.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("{label} is required");
    }
    Ok(value)
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} (y/n) ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("Failed to read input")?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Print the playlist profile summary.
fn print_profile(profile: &PlaylistProfile) {
    println!("Playlist profile ({} tracks)", profile.track_count);
    println!("==================");
    if profile.top_genres.is_empty() {
        println!("Top genres:    (none — searching without a genre filter)");
    } else {
        println!("Top genres:");
        for (i, genre) in profile.top_genres.iter().enumerate() {
            println!("  {}. {}", i + 1, genre);
        }
    }
    if !profile.subgenres.is_empty() {
        println!("Subgenres of {}: {}", profile.top_genres[0], profile.subgenres.join(", "));
    }
    println!("Danceability:  {:.2}", profile.danceability);
    println!("Energy:        {:.2}", profile.energy);
}

/// Print the search rounds and the planned replacement.
fn print_plan(plan: &RefreshPlan) {
    println!("{:>5} {:>7} {:>10} {:>8} {:>6}", "Round", "Radius", "Candidates", "Matched", "Total");
    println!("{}", "-".repeat(40));
    for r in &plan.report.rounds {
        println!(
            "{:>5} {:>7.2} {:>10} {:>8} {:>6}",
            r.round, r.band.danceability_radius, r.candidates, r.matched, r.total
        );
    }
    println!();

    if let MatchOutcome::Insufficient { found, wanted } = plan.report.outcome {
        println!("Warning: found only {found} of {wanted} requested matches");
    }
    println!(
        "Found {} matching tracks ({} already in the playlist); new playlist will have {} tracks",
        plan.report.track_ids.len(),
        plan.already_present,
        plan.replacement.len()
    );
}
