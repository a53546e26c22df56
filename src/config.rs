use std::{
    env,
    net::IpAddr,
    path::PathBuf,
    time::Duration,
};

/// Runtime configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub rubric_dir: PathBuf,
    pub session_ttl: Duration,
    pub debug: bool,
}

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_RUBRIC_DIR: &str = "rubrics";
const DEFAULT_SESSION_TTL_MINUTES: u64 = 120;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173,http://localhost:3000";

impl AppConfig {
    pub fn from_env() -> Self {
        let host = env::var("HOST")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| IpAddr::from([0, 0, 0, 0]));

        let port = env::var("PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());

        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());

        let rubric_dir = env::var("RUBRIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RUBRIC_DIR));

        let session_ttl_minutes = env::var("SESSION_TTL_MINUTES")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|minutes| *minutes > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_MINUTES);

        let debug = env::var("DEBUG")
            .map(|raw| raw.eq_ignore_ascii_case("true") || raw == "1")
            .unwrap_or(false);

        Self {
            host,
            port,
            allowed_origins,
            gemini_api_key,
            gemini_model,
            rubric_dir,
            session_ttl: Duration::from_secs(session_ttl_minutes * 60),
            debug,
        }
    }

    /// `ALLOWED_ORIGINS=*` opts into a permissive CORS policy.
    pub fn cors_allow_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}
