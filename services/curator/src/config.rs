use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::orchestrator_job::DEFAULT_HISTORY_LIMIT;
use crate::provider::GenerationParams;
use crate::types_jobs::JobConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,

    pub model_base_url: String,
    pub model_api_key: Option<String>,
    pub model_name: String,
    pub temperature: f32,
    pub split_field_requests: bool,

    pub data_path: PathBuf,
    pub session: String,
    pub prompts_path: Option<PathBuf>,

    pub job: JobConfig,
    /// Finished jobs kept for `GET /jobs`.
    pub job_history_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).with_context(|| format!("Missing required env var: {key}"));
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let model_base_url = required("MODEL_BASE_URL")?;
        if !model_base_url.starts_with("http://") && !model_base_url.starts_with("https://") {
            bail!("MODEL_BASE_URL must start with http:// or https://");
        }

        let job = JobConfig {
            concurrency: parse_num("JOB_CONCURRENCY", &or_default("JOB_CONCURRENCY", "1"))?,
            pace_ms: parse_num("JOB_SLEEP_MS", &or_default("JOB_SLEEP_MS", "0"))?,
            max_retries: parse_num("JOB_MAX_RETRIES", &or_default("JOB_MAX_RETRIES", "2"))?,
            retry_delay_ms: parse_num("JOB_RETRY_DELAY_MS", &or_default("JOB_RETRY_DELAY_MS", "2000"))?,
        };
        if job.concurrency == 0 {
            bail!("JOB_CONCURRENCY must be at least 1");
        }

        let split_field_requests = get("SPLIT_FIELD_REQUESTS")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(false);

        Ok(Self {
            bind_addr: or_default("CURATOR_BIND_ADDR", "0.0.0.0:8080"),
            model_base_url,
            model_api_key: get("MODEL_API_KEY"),
            model_name: or_default("MODEL_NAME", "default"),
            temperature: parse_num("MODEL_TEMPERATURE", &or_default("MODEL_TEMPERATURE", "0.7"))?,
            split_field_requests,
            data_path: PathBuf::from(or_default("CURATOR_DATA_PATH", "curator_data.json")),
            session: or_default("CURATOR_SESSION", "default"),
            prompts_path: get("CURATOR_PROMPTS_PATH").map(PathBuf::from),
            job,
            job_history_limit: parse_num(
                "JOB_HISTORY_LIMIT",
                &or_default("JOB_HISTORY_LIMIT", &DEFAULT_HISTORY_LIMIT.to_string()),
            )?,
        })
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model: Some(self.model_name.clone()),
            temperature: Some(self.temperature),
            max_tokens: None,
            split_field_requests: self.split_field_requests,
        }
    }
}

fn parse_num<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{key} must be a number, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[("MODEL_BASE_URL", "http://127.0.0.1:1234")])).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.job, JobConfig::default());
        assert!(!cfg.split_field_requests);
        assert_eq!(cfg.session, "default");
        assert_eq!(cfg.job_history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn job_settings_parse() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("MODEL_BASE_URL", "https://api.example.com"),
            ("JOB_CONCURRENCY", "4"),
            ("JOB_SLEEP_MS", "500"),
            ("SPLIT_FIELD_REQUESTS", "true"),
            ("JOB_HISTORY_LIMIT", "5"),
        ]))
        .unwrap();
        assert_eq!(cfg.job_history_limit, 5);
        assert_eq!(cfg.job.concurrency, 4);
        assert_eq!(cfg.job.pace_ms, 500);
        assert!(cfg.generation_params().split_field_requests);
    }

    #[test]
    fn fails_fast_on_bad_values() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("MODEL_BASE_URL", "localhost:1234")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[
            ("MODEL_BASE_URL", "http://x"),
            ("JOB_CONCURRENCY", "0"),
        ]))
        .is_err());
        assert!(AppConfig::from_lookup(lookup(&[
            ("MODEL_BASE_URL", "http://x"),
            ("JOB_MAX_RETRIES", "many"),
        ]))
        .is_err());
    }
}
