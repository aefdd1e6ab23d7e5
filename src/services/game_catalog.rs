use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const UNKNOWN_GAME: &str = "unknown game";

/// Source of game display names
#[async_trait]
pub trait GameCatalog: Send + Sync {
    async fn game_name(&self, game_code: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct GameRecord {
    name: String,
}

/// Catalog service reached over HTTP: `GET {base_url}/games/{code}`
pub struct HttpGameCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGameCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `game_code` goes in as a single percent-encoded path segment
    fn game_url(&self, game_code: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid catalog url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("catalog url {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(["games", game_code]);
        Ok(url)
    }
}

#[async_trait]
impl GameCatalog for HttpGameCatalog {
    async fn game_name(&self, game_code: &str) -> Result<Option<String>> {
        let url = self.game_url(game_code)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: GameRecord = response
            .error_for_status()
            .context("catalog returned an error status")?
            .json()
            .await
            .context("catalog body is not a game record")?;
        Ok(Some(record.name))
    }
}

/// Fixed code-to-name table
#[derive(Default)]
pub struct StaticGameCatalog {
    names: HashMap<String, String>,
}

impl StaticGameCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_game(mut self, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(code.into(), name.into());
        self
    }
}

#[async_trait]
impl GameCatalog for StaticGameCatalog {
    async fn game_name(&self, game_code: &str) -> Result<Option<String>> {
        Ok(self.names.get(game_code).cloned())
    }
}

/// Game metadata resolved for one settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInfo {
    pub code: String,
    pub name: String,
    pub crash_style: bool,
}

/// Bounded catalog lookup, done before any balance mutation
pub struct GameLookup {
    catalog: Arc<dyn GameCatalog>,
    timeout: Duration,
    crash_patterns: Vec<String>,
}

impl GameLookup {
    pub fn new(catalog: Arc<dyn GameCatalog>, timeout: Duration, crash_patterns: Vec<String>) -> Self {
        Self {
            catalog,
            timeout,
            crash_patterns: crash_patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Never fails: timeouts and catalog errors fall back to `UNKNOWN_GAME`
    pub async fn resolve(&self, game_code: &str) -> GameInfo {
        let name = match tokio::time::timeout(self.timeout, self.catalog.game_name(game_code)).await {
            Ok(Ok(Some(name))) => name,
            Ok(Ok(None)) => UNKNOWN_GAME.to_string(),
            Ok(Err(e)) => {
                warn!("Game lookup for {} failed: {:#}", game_code, e);
                UNKNOWN_GAME.to_string()
            }
            Err(_) => {
                warn!("Game lookup for {} timed out after {:?}", game_code, self.timeout);
                UNKNOWN_GAME.to_string()
            }
        };
        let crash_style = self.is_crash_style(game_code, &name);
        GameInfo {
            code: game_code.to_string(),
            name,
            crash_style,
        }
    }

    pub fn is_crash_style(&self, game_code: &str, game_name: &str) -> bool {
        let code = game_code.to_lowercase();
        let name = game_name.to_lowercase();
        self.crash_patterns
            .iter()
            .any(|p| code.contains(p.as_str()) || name.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowCatalog;

    #[async_trait]
    impl GameCatalog for SlowCatalog {
        async fn game_name(&self, _game_code: &str) -> Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some("too late".to_string()))
        }
    }

    fn patterns() -> Vec<String> {
        vec!["aviator".to_string(), "crash".to_string()]
    }

    #[tokio::test]
    async fn test_known_game_and_crash_detection() {
        let catalog = StaticGameCatalog::new().with_game("spribe_01", "Aviator");
        let lookup = GameLookup::new(Arc::new(catalog), Duration::from_millis(200), patterns());

        let info = lookup.resolve("spribe_01").await;
        assert_eq!(info.name, "Aviator");
        assert!(info.crash_style);

        let info = lookup.resolve("slot-7").await;
        assert_eq!(info.name, UNKNOWN_GAME);
        assert!(!info.crash_style);
    }

    #[test]
    fn test_game_code_is_encoded_as_one_segment() {
        let catalog = HttpGameCatalog::new("http://catalog.local/api/");
        let url = catalog.game_url("slot/7 x?y").unwrap();
        assert_eq!(url.as_str(), "http://catalog.local/api/games/slot%2F7%20x%3Fy");

        let catalog = HttpGameCatalog::new("http://catalog.local");
        let url = catalog.game_url("aviator").unwrap();
        assert_eq!(url.as_str(), "http://catalog.local/games/aviator");
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_unknown() {
        let lookup = GameLookup::new(Arc::new(SlowCatalog), Duration::from_millis(20), patterns());
        let info = lookup.resolve("crash-x").await;
        assert_eq!(info.name, UNKNOWN_GAME);
        // Code alone still identifies crash-style games
        assert!(info.crash_style);
    }
}
