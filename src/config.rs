// Client configuration
// Defaults target the certification environment with a single pooled session

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

pub const BASE_URL_TEST: &str = "https://api.test.sabre.com";
pub const BASE_URL_PROD: &str = "https://api.sabre.com";
pub const SOAP_URL_TEST: &str = "https://sws3-crt.cert.sabre.com";
pub const SOAP_URL_PROD: &str = "https://webservices.sabre.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Prod,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Test => BASE_URL_TEST,
            Environment::Prod => BASE_URL_PROD,
        }
    }

    pub fn soap_url(&self) -> &'static str {
        match self {
            Environment::Test => SOAP_URL_TEST,
            Environment::Prod => SOAP_URL_PROD,
        }
    }
}

// Session pool configuration. Capacity is read at call time and never persisted
// alongside the pool, so create/refresh/close must be called with the same value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_sessions: usize,
    pub counter_key: String,
    pub slot_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1,
            counter_key: "index_sessions".to_string(),
            slot_prefix: "session_".to_string(),
        }
    }
}

// Identity used in the SOAP message header
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SoapConfig {
    // Overrides the environment's web services URL when set
    pub url: Option<String>,
    pub username: String,
    pub password: String,
    // Pseudo city code
    pub organization: String,
    pub domain: String,
    pub party_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub environment: Environment,
    #[serde(rename = "sabre_client_id")]
    pub client_id: Option<String>,
    #[serde(rename = "sabre_client_secret")]
    pub client_secret: Option<String>,
    pub timeout_ms: u64,
    pub soap: SoapConfig,
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Test,
            client_id: None,
            client_secret: None,
            timeout_ms: 30_000,
            soap: SoapConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("invalid client configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn base_url(&self) -> &'static str {
        self.environment.base_url()
    }

    pub fn soap_url(&self) -> String {
        self.soap
            .url
            .clone()
            .unwrap_or_else(|| self.environment.soap_url().to_string())
    }
}
