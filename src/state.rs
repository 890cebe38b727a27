use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::advisor::AdviceEngine;
use crate::confidence::calibration::CalibrationSettings;
use crate::confidence::store::{CnidariumStore, ConfidenceStore, MemoryStore};
use crate::confidence::tuner::PhraseTuner;
use crate::confidence::{Calibrator, ConfidenceLogger};
use crate::llm::LlmClient;
use crate::search::SearchDecisionEngine;
use crate::tools::catalog::stats_tools;
use crate::tools::stats::StatsServiceClient;
use crate::tools::ToolRegistry;
use crate::validate::SchemaValidator;

/// Per-request generation parameters.
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub default_model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Bound on buffered downstream events per request.
    pub channel_capacity: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4.1".to_string(),
            max_output_tokens: 2000,
            temperature: 0.7,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Cnidarium,
    Memory,
}

/// Process configuration read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    /// 0 disables the in-process calibration job.
    pub calibration_interval_hours: u64,
    pub advisor: AdvisorConfig,
    pub calibration: CalibrationSettings,
}

fn env_or(key: &str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let store_backend = match env_or("STORE_BACKEND", "cnidarium").to_lowercase().as_str() {
            "cnidarium" => StoreBackend::Cnidarium,
            "memory" => StoreBackend::Memory,
            other => bail!("unknown STORE_BACKEND `{}` (expected cnidarium or memory)", other),
        };
        let calibration_interval_hours = env_or("CALIBRATION_INTERVAL_HOURS", "0")
            .parse::<u64>()
            .context("CALIBRATION_INTERVAL_HOURS must be a whole number")?;

        let advisor = AdvisorConfig {
            default_model: env_or("LLM_MODEL", "gpt-4.1"),
            ..AdvisorConfig::default()
        };

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "127.0.0.1:8000"),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data/confidence")),
            store_backend,
            calibration_interval_hours,
            advisor,
            calibration: CalibrationSettings::default(),
        })
    }

    pub async fn open_store(&self) -> Result<Arc<dyn ConfidenceStore>> {
        Ok(match self.store_backend {
            StoreBackend::Cnidarium => {
                let store = CnidariumStore::new(&self.data_dir).await?;
                info!("Confidence store initialized at {:?}", self.data_dir);
                Arc::new(store)
            }
            StoreBackend::Memory => {
                info!("Using in-memory confidence store");
                Arc::new(MemoryStore::new())
            }
        })
    }
}

/// The confidence half of the system, usable without an upstream client.
#[derive(Clone)]
pub struct ConfidenceServices {
    pub logger: Arc<ConfidenceLogger>,
    pub tuner: Arc<PhraseTuner>,
    pub calibrator: Arc<Calibrator>,
}

impl ConfidenceServices {
    pub fn new(store: Arc<dyn ConfidenceStore>, settings: CalibrationSettings) -> Self {
        let logger = Arc::new(ConfidenceLogger::new(store.clone()));
        let tuner = Arc::new(PhraseTuner::new(store));
        let calibrator = Arc::new(Calibrator::new(logger.clone(), tuner.clone(), settings));
        Self {
            logger,
            tuner,
            calibrator,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: AdviceEngine,
    pub confidence: ConfidenceServices,
}

impl AppState {
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let store = settings.open_store().await?;
        let confidence = ConfidenceServices::new(store, settings.calibration.clone());

        let llm = Arc::new(LlmClient::from_env()?);
        info!("LLM client initialized");

        let stats = Arc::new(StatsServiceClient::from_env()?);
        let registry = Arc::new(ToolRegistry::with_backend(stats_tools(), stats));
        if registry.is_empty() {
            warn!("No tools registered; answers will rely on search and model knowledge");
        }
        info!(tools = registry.len(), "Tool registry initialized");

        let engine = AdviceEngine::new(
            llm,
            registry,
            Arc::new(SearchDecisionEngine::default()),
            Arc::new(SchemaValidator::default()),
            confidence.logger.clone(),
            confidence.tuner.clone(),
            settings.advisor.clone(),
        );

        Ok(Self { engine, confidence })
    }
}
