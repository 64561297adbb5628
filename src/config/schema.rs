//! Configuration schema for qabench.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so that the JSON config
//! file can use camelCase keys while Rust code uses snake_case fields.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Serving (answer generation)
// ---------------------------------------------------------------------------

/// Settings for answer generation against the local model-serving endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServingConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Model identifier. Empty means "not configured".
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_num_questions")]
    pub num_questions: usize,
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_serving_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_sleep_secs")]
    pub retry_sleep_secs: f64,
    #[serde(default = "default_true")]
    pub strip_think: bool,
}

fn default_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_num_questions() -> usize {
    1000
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("qa_pairs.json")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_serving_timeout_secs() -> u64 {
    600
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_sleep_secs() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: String::new(),
            lang: default_lang(),
            num_questions: default_num_questions(),
            dataset_path: default_dataset_path(),
            out_dir: default_out_dir(),
            request_timeout_secs: default_serving_timeout_secs(),
            max_retries: default_max_retries(),
            retry_sleep_secs: default_retry_sleep_secs(),
            strip_think: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Grading (judge endpoint)
// ---------------------------------------------------------------------------

/// Settings for the remote chat-completions grading endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_grading_url")]
    pub url: String,
    #[serde(default = "default_grading_model")]
    pub model: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_grading_timeout_secs")]
    pub request_timeout_secs: u64,
}

pub const DEFAULT_GRADING_URL: &str = "https://idun-llm.hpc.ntnu.no/api/chat/completions";

fn default_grading_url() -> String {
    DEFAULT_GRADING_URL.to_string()
}

fn default_grading_model() -> String {
    "openai/gpt-oss-120b".to_string()
}

fn default_concurrency() -> usize {
    100
}

fn default_grading_timeout_secs() -> u64 {
    120
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: default_grading_url(),
            model: default_grading_model(),
            concurrency: default_concurrency(),
            request_timeout_secs: default_grading_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

/// Root configuration object passed explicitly to every component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchConfig {
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub grading: GradingConfig,
}

/// Values given explicitly on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub model: Option<String>,
    pub lang: Option<String>,
    pub num_questions: Option<usize>,
    pub dataset_path: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub max_retries: Option<usize>,
    pub retry_sleep_secs: Option<f64>,
    pub no_strip_think: bool,
    pub api_key: Option<String>,
    pub grading_url: Option<String>,
    pub grading_model: Option<String>,
    pub concurrency: Option<usize>,
}

impl ConfigOverrides {
    /// Apply every explicitly given value on top of `config`.
    pub fn apply(&self, config: &mut BenchConfig) {
        let s = &mut config.serving;
        if let Some(v) = &self.host {
            s.host = v.clone();
        }
        if let Some(v) = &self.model {
            s.model = v.clone();
        }
        if let Some(v) = &self.lang {
            s.lang = v.to_lowercase();
        }
        if let Some(v) = self.num_questions {
            s.num_questions = v;
        }
        if let Some(v) = &self.dataset_path {
            s.dataset_path = v.clone();
        }
        if let Some(v) = &self.out_dir {
            s.out_dir = v.clone();
        }
        if let Some(v) = self.max_retries {
            s.max_retries = v;
        }
        if let Some(v) = self.retry_sleep_secs {
            s.retry_sleep_secs = v;
        }
        if self.no_strip_think {
            s.strip_think = false;
        }

        let g = &mut config.grading;
        if let Some(v) = &self.api_key {
            g.api_key = v.clone();
        }
        if let Some(v) = &self.grading_url {
            g.url = v.clone();
        }
        if let Some(v) = &self.grading_model {
            g.model = v.clone();
        }
        if let Some(v) = self.concurrency {
            g.concurrency = v;
        }
    }
}
