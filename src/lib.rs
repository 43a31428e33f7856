pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod matcher;
pub mod profile;
pub mod update;

/// Application name for XDG paths
pub const APP_NAME: &str = "playmatch";
