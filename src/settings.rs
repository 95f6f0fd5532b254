use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub concurrency: usize,
    pub max_fixes: u32,
    pub progress_every: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub translate_prompt_path: PathBuf,
    pub fix_prompt_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/v1".to_string(),
            api_key: "not-used".to_string(),
            model: "Qwen/Qwen3-4B-Instruct-2507-FP8".to_string(),
            temperature: 0.2,
            max_tokens: 5120,
            request_timeout_secs: 60,
            concurrency: 10,
            max_fixes: 1,
            progress_every: 2000,
            input_path: PathBuf::from("pretrain_hq.jsonl"),
            output_path: PathBuf::from("./out/pretrain_hq.en.jsonl"),
            translate_prompt_path: PathBuf::from("prompts/translate_system.txt"),
            fix_prompt_path: PathBuf::from("prompts/fix_system.txt"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    endpoint: Option<EndpointSettings>,
    pipeline: Option<PipelineSettings>,
    paths: Option<PathSettings>,
    prompts: Option<PromptSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSettings {
    concurrency: Option<usize>,
    max_fixes: Option<u32>,
    progress_every: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PathSettings {
    input: Option<String>,
    output: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptSettings {
    translate: Option<String>,
    fix: Option<String>,
}

/// Loads settings from the embedded defaults, `settings.toml` and
/// `settings.local.toml` in the working directory, an optional extra file, and
/// finally the process environment.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    let mut settings = load_settings_from_paths(&ordered_paths)?;
    settings.apply_env(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

pub fn load_settings_from_paths(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    let embedded: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML)
        .with_context(|| "failed to parse embedded settings")?;
    settings.merge(embedded);

    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Overrides values from environment variables. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("OPENAI_BASE_URL") {
            self.base_url = value;
        }
        if let Some(value) = get("OPENAI_API_KEY") {
            self.api_key = value;
        }
        if let Some(value) = get("MODEL_ID") {
            self.model = value;
        }
        if let Some(value) = get("CONCURRENCY") {
            self.concurrency = parse_env("CONCURRENCY", &value)?;
        }
        if let Some(value) = get("MAX_FIXES") {
            self.max_fixes = parse_env("MAX_FIXES", &value)?;
        }
        if let Some(value) = get("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("OUTPUT_PATH") {
            self.output_path = PathBuf::from(value);
        }
        if let Some(value) = get("INPUT_FILE") {
            self.input_path = PathBuf::from(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request timeout must be at least 1 second"));
        }
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("endpoint base_url is empty"));
        }
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(endpoint) = incoming.endpoint {
            if let Some(base_url) = non_blank(endpoint.base_url) {
                self.base_url = base_url;
            }
            if let Some(api_key) = non_blank(endpoint.api_key) {
                self.api_key = api_key;
            }
            if let Some(model) = non_blank(endpoint.model) {
                self.model = model;
            }
            if let Some(temperature) = endpoint.temperature {
                if temperature >= 0.0 {
                    self.temperature = temperature;
                }
            }
            if let Some(max_tokens) = endpoint.max_tokens {
                self.max_tokens = max_tokens;
            }
            if let Some(timeout) = endpoint.timeout_secs {
                self.request_timeout_secs = timeout;
            }
        }
        if let Some(pipeline) = incoming.pipeline {
            if let Some(concurrency) = pipeline.concurrency {
                self.concurrency = concurrency;
            }
            if let Some(max_fixes) = pipeline.max_fixes {
                self.max_fixes = max_fixes;
            }
            if let Some(every) = pipeline.progress_every {
                if every > 0 {
                    self.progress_every = every;
                }
            }
        }
        if let Some(paths) = incoming.paths {
            if let Some(input) = non_blank(paths.input) {
                self.input_path = PathBuf::from(input);
            }
            if let Some(output) = non_blank(paths.output) {
                self.output_path = PathBuf::from(output);
            }
        }
        if let Some(prompts) = incoming.prompts {
            if let Some(translate) = non_blank(prompts.translate) {
                self.translate_prompt_path = PathBuf::from(translate);
            }
            if let Some(fix) = non_blank(prompts.fix) {
                self.fix_prompt_path = PathBuf::from(fix);
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| anyhow!("invalid value for {}: '{}'", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn embedded_defaults_match_built_in_defaults() {
        let settings = load_settings_from_paths(&[]).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path().join("settings.toml");
        let local = dir.path().join("settings.local.toml");
        fs::write(
            &base,
            "[pipeline]\nconcurrency = 4\nmax_fixes = 3\n[paths]\noutput = \"a.jsonl\"\n",
        )
        .unwrap();
        fs::write(&local, "[pipeline]\nconcurrency = 32\n[endpoint]\nmodel = \"  \"\n").unwrap();

        let settings =
            load_settings_from_paths(&[base, local, dir.path().join("missing.toml")]).unwrap();
        assert_eq!(settings.concurrency, 32);
        assert_eq!(settings.max_fixes, 3);
        assert_eq!(settings.output_path, PathBuf::from("a.jsonl"));
        assert_eq!(settings.model, Settings::default().model);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[pipeline\nconcurrency = ").unwrap();
        let err = load_settings_from_paths(&[path]).unwrap_err();
        assert!(err.to_string().contains("failed to parse settings"));
    }

    #[test]
    fn environment_overrides_files() {
        let env = HashMap::from([
            ("OPENAI_BASE_URL", "http://gpu-box:8000/v1"),
            ("OPENAI_API_KEY", "sk-test"),
            ("MODEL_ID", "qwen"),
            ("CONCURRENCY", " 64 "),
            ("MAX_FIXES", "2"),
            ("OUTPUT_PATH", "/tmp/out.jsonl"),
            ("INPUT_FILE", ""),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_env(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(settings.base_url, "http://gpu-box:8000/v1");
        assert_eq!(settings.api_key, "sk-test");
        assert_eq!(settings.model, "qwen");
        assert_eq!(settings.concurrency, 64);
        assert_eq!(settings.max_fixes, 2);
        assert_eq!(settings.output_path, PathBuf::from("/tmp/out.jsonl"));
        assert_eq!(settings.input_path, Settings::default().input_path);
    }

    #[test]
    fn invalid_numeric_environment_is_an_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(|key| (key == "CONCURRENCY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CONCURRENCY"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let settings = Settings {
            concurrency: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
        assert!(Settings::default().validate().is_ok());
    }
}
