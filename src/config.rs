use crate::models;
use std::collections::HashMap;

/// Flat `key=value` config file at `<data_home>/config`, same precedence
/// chain the prior art used for its own settings: env var, then this file,
/// then a hardcoded default.
pub fn load_file() -> HashMap<String, String> {
    let path = models::data_path("config");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .filter_map(|l| {
            let (k, v) = l.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn resolve(file: &HashMap<String, String>, env_key: &str, file_key: &str) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .or_else(|| file.get(file_key).cloned())
}

/// Matcher tuning knobs (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub keyword_weight: f64,
    pub semantic_weight: f64,
    pub confidence_threshold: f64,
    pub max_candidates: usize,
    pub enable_semantic: bool,
    pub max_api_calls_per_minute: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            keyword_weight: 0.5,
            semantic_weight: 0.5,
            confidence_threshold: 0.7,
            max_candidates: 10,
            enable_semantic: true,
            max_api_calls_per_minute: 60,
        }
    }
}

impl MatcherConfig {
    pub fn load() -> Self {
        let file = load_file();
        let mut cfg = MatcherConfig::default();
        if let Some(v) = resolve(&file, "CONVOY_KEYWORD_WEIGHT", "KEYWORD_WEIGHT") {
            if let Ok(n) = v.parse() {
                cfg.keyword_weight = n;
            }
        }
        if let Some(v) = resolve(&file, "CONVOY_SEMANTIC_WEIGHT", "SEMANTIC_WEIGHT") {
            if let Ok(n) = v.parse() {
                cfg.semantic_weight = n;
            }
        }
        if let Some(v) = resolve(
            &file,
            "CONVOY_CONFIDENCE_THRESHOLD",
            "CONFIDENCE_THRESHOLD",
        ) {
            if let Ok(n) = v.parse() {
                cfg.confidence_threshold = n;
            }
        }
        if let Some(v) = resolve(&file, "CONVOY_MAX_CANDIDATES", "MAX_CANDIDATES") {
            if let Ok(n) = v.parse() {
                cfg.max_candidates = n;
            }
        }
        if let Some(v) = resolve(&file, "CONVOY_ENABLE_SEMANTIC", "ENABLE_SEMANTIC") {
            cfg.enable_semantic = matches!(v.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(v) = resolve(
            &file,
            "CONVOY_MAX_API_CALLS_PER_MINUTE",
            "MAX_API_CALLS_PER_MINUTE",
        ) {
            if let Ok(n) = v.parse() {
                cfg.max_api_calls_per_minute = n;
            }
        }
        cfg
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue_path: std::path::PathBuf,
    pub branch_pattern: String,
    pub max_retries: u32,
    pub llm_command: String,
    pub llm_timeout_secs: u64,
    pub matcher: MatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            queue_path: models::data_path("queue.jsonl"),
            branch_pattern: r"([A-Z]+-\d+)".to_string(),
            max_retries: 3,
            llm_command: "llm".to_string(),
            llm_timeout_secs: 60,
            matcher: MatcherConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let file = load_file();
        let mut cfg = Config::default();
        if let Some(v) = std::env::var("CONVOY_QUEUE_PATH").ok() {
            cfg.queue_path = std::path::PathBuf::from(v);
        }
        if let Some(v) = resolve(&file, "CONVOY_BRANCH_PATTERN", "BRANCH_PATTERN") {
            cfg.branch_pattern = v;
        }
        if let Some(v) = resolve(&file, "CONVOY_MAX_RETRIES", "MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                cfg.max_retries = n;
            }
        }
        if let Some(v) = resolve(&file, "CONVOY_LLM_COMMAND", "LLM_COMMAND") {
            cfg.llm_command = v;
        }
        if let Some(v) = resolve(&file, "CONVOY_LLM_TIMEOUT_SECS", "LLM_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.llm_timeout_secs = n;
            }
        }
        cfg.matcher = MatcherConfig::load();
        cfg
    }
}
