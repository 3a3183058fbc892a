//! Configuration management for the feed engine
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote data service
    pub remote: RemoteConfig,
    /// Change feed transport
    pub realtime: RealtimeConfig,
    /// Playback, view accounting and feed tuning
    pub playback: PlaybackConfig,
}

/// Remote data service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project base URL (https://<project>.supabase.co)
    pub url: String,
    /// Public anon key sent as `apikey`
    pub anon_key: String,
    /// Access token of the signed-in user, if any
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Change feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Redis URL; realtime sync is disabled when unset
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Fraction of a card that must be visible to activate it
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
    /// Seconds of actual playback before a view is counted
    #[serde(default = "default_view_threshold_secs")]
    pub view_threshold_secs: u32,
    #[serde(default = "default_view_tick_ms")]
    pub view_tick_ms: u64,
    #[serde(default = "default_story_sample_ms")]
    pub story_sample_ms: u64,
    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,
    /// Minimum views for a video to count as trending
    #[serde(default = "default_trending_min_views")]
    pub trending_min_views: u64,
}

// Default values
fn default_timeout_ms() -> u64 {
    10_000
}

fn default_visibility_threshold() -> f64 {
    0.6
}

fn default_view_threshold_secs() -> u32 {
    2
}

fn default_view_tick_ms() -> u64 {
    1_000
}

fn default_story_sample_ms() -> u64 {
    100
}

fn default_feed_limit() -> usize {
    50
}

fn default_trending_min_views() -> u64 {
    2_000
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            view_threshold_secs: default_view_threshold_secs(),
            view_tick_ms: default_view_tick_ms(),
            story_sample_ms: default_story_sample_ms(),
            feed_limit: default_feed_limit(),
            trending_min_views: default_trending_min_views(),
        }
    }
}

impl PlaybackConfig {
    pub fn view_tick(&self) -> Duration {
        Duration::from_millis(self.view_tick_ms)
    }

    pub fn story_sample_interval(&self) -> Duration {
        Duration::from_millis(self.story_sample_ms)
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let remote = RemoteConfig {
            url: std::env::var("SUPABASE_URL")
                .context("SUPABASE_URL environment variable not set")?,
            anon_key: std::env::var("SUPABASE_ANON_KEY")
                .context("SUPABASE_ANON_KEY environment variable not set")?,
            access_token: std::env::var("SUPABASE_ACCESS_TOKEN").ok(),
            timeout_ms: env_or("REMOTE_TIMEOUT_MS", default_timeout_ms()),
        };

        let realtime = RealtimeConfig {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
        };

        let playback = PlaybackConfig {
            visibility_threshold: env_or("VISIBILITY_THRESHOLD", default_visibility_threshold()),
            view_threshold_secs: env_or("VIEW_THRESHOLD_SECS", default_view_threshold_secs()),
            view_tick_ms: env_or("VIEW_TICK_MS", default_view_tick_ms()),
            story_sample_ms: env_or("STORY_SAMPLE_MS", default_story_sample_ms()),
            feed_limit: env_or("FEED_LIMIT", default_feed_limit()),
            trending_min_views: env_or("TRENDING_MIN_VIEWS", default_trending_min_views()),
        };

        if !(0.0..=1.0).contains(&playback.visibility_threshold) {
            anyhow::bail!(
                "VISIBILITY_THRESHOLD must be within 0.0..=1.0, got {}",
                playback.visibility_threshold
            );
        }

        Ok(Config {
            remote,
            realtime,
            playback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        std::env::set_var("SUPABASE_URL", "https://project.supabase.co");
        std::env::set_var("SUPABASE_ANON_KEY", "anon");

        let config = Config::from_env().unwrap();

        assert_eq!(config.remote.url, "https://project.supabase.co");
        assert_eq!(config.remote.timeout_ms, 10_000);
        assert_eq!(config.playback.visibility_threshold, 0.6);
        assert_eq!(config.playback.view_threshold_secs, 2);
        assert_eq!(config.playback.view_tick(), Duration::from_secs(1));
        assert_eq!(config.playback.story_sample_interval(), Duration::from_millis(100));
        assert_eq!(config.playback.feed_limit, 50);
        assert_eq!(config.playback.trending_min_views, 2_000);
    }

    #[test]
    fn test_playback_defaults_match_env_defaults() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.view_tick_ms, 1_000);
        assert_eq!(playback.story_sample_ms, 100);
    }
}
