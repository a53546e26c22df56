use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::llm::GeminiClient;
use crate::rubric::RubricStore;
use crate::session::SessionStore;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: AppConfig,
    gemini: GeminiClient,
    sessions: SessionStore,
    rubrics: RubricStore,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let gemini = GeminiClient::from_config(&config).context("failed to initialize model client")?;
        let rubrics = RubricStore::new(config.rubric_dir.clone())
            .await
            .context("failed to prepare rubric storage directory")?;
        let sessions = SessionStore::new(config.session_ttl);

        Ok(Self {
            config,
            gemini,
            sessions,
            rubrics,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gemini(&self) -> &GeminiClient {
        &self.gemini
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn rubrics(&self) -> &RubricStore {
        &self.rubrics
    }
}
