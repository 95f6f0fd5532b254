use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

pub mod detector;
pub mod driver;
pub mod logging;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod settings;
pub mod turns;
pub mod writer;

#[cfg(test)]
mod test_util;

pub use driver::{BatchDriver, BatchSummary};
pub use pipeline::{Pipeline, PipelineOptions, Record, RunOutcome, Stage};
pub use providers::{ChatProvider, OpenAI, ProviderUsage, UsageTotals};
pub use settings::Settings;

/// Command-line overrides applied on top of the loaded settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub key: Option<String>,
    pub concurrency: Option<usize>,
    pub max_fixes: Option<u32>,
    pub translate_prompt: Option<PathBuf>,
    pub fix_prompt: Option<PathBuf>,
    pub settings_path: Option<String>,
}

impl Config {
    fn apply(&self, settings: &mut Settings) {
        if let Some(input) = self.input.clone() {
            settings.input_path = input;
        }
        if let Some(output) = self.output.clone() {
            settings.output_path = output;
        }
        if let Some(model) = self.model.clone() {
            settings.model = model;
        }
        if let Some(base_url) = self.base_url.clone() {
            settings.base_url = base_url;
        }
        if let Some(key) = self.key.clone() {
            settings.api_key = key;
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(max_fixes) = self.max_fixes {
            settings.max_fixes = max_fixes;
        }
        if let Some(path) = self.translate_prompt.clone() {
            settings.translate_prompt_path = path;
        }
        if let Some(path) = self.fix_prompt.clone() {
            settings.fix_prompt_path = path;
        }
    }
}

pub async fn run(config: Config) -> Result<BatchSummary> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    config.apply(&mut settings);
    settings.validate()?;
    run_with_settings(settings).await
}

pub async fn run_with_settings(settings: Settings) -> Result<BatchSummary> {
    // fail before touching the endpoint or the output when the corpus is missing
    if !settings.input_path.is_file() {
        return Err(anyhow::anyhow!(
            "input file not found: {}",
            settings.input_path.display()
        ));
    }
    let prompts = prompts::load_prompts(&settings)?;
    let provider = OpenAI::new(settings.api_key.clone())?
        .with_base_url(settings.base_url.clone())
        .with_model(settings.model.clone())
        .with_temperature(settings.temperature)
        .with_timeout(settings.request_timeout())?;
    let writer = writer::OutputWriter::open(&settings.output_path)
        .await
        .with_context(|| "output directory is not usable")?;

    info!(
        "translating {} -> {} with {} at {} (concurrency {}, max fixes {})",
        settings.input_path.display(),
        writer.path().display(),
        provider.model(),
        provider.base_url(),
        settings.concurrency,
        settings.max_fixes
    );

    let pipeline = Pipeline::new(
        provider,
        prompts,
        writer,
        Arc::new(Semaphore::new(settings.concurrency)),
        PipelineOptions::from_settings(&settings),
    );
    BatchDriver::new(pipeline, settings.concurrency)
        .with_progress_every(settings.progress_every)
        .run(&settings.input_path)
        .await
}

pub fn format_summary(summary: &BatchSummary) -> String {
    let mut lines = vec![
        format!("records: {}", summary.records),
        format!("translated: {}", summary.translated),
        format!("unchanged: {}", summary.passthrough),
        format!("fix passes: {}", summary.fix_passes),
    ];
    if summary.exhausted > 0 {
        lines.push(format!("still chinese: {}", summary.exhausted));
    }
    if summary.skipped_lines > 0 {
        lines.push(format!("skipped lines: {}", summary.skipped_lines));
    }
    if summary.failed_calls > 0 {
        lines.push(format!("failed calls: {}", summary.failed_calls));
    }
    if summary.failed_writes > 0 {
        lines.push(format!("failed writes: {}", summary.failed_writes));
    }
    if summary.failed_runs > 0 {
        lines.push(format!("crashed runs: {}", summary.failed_runs));
    }
    lines.push(format_usage(&summary.usage));
    lines.join("\n")
}

fn format_usage(usage: &UsageTotals) -> String {
    if usage.total_tokens == 0 {
        return "tokens: unavailable".to_string();
    }
    format!(
        "tokens: prompt={}, completion={}, total={}",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_precedence() {
        let mut settings = Settings::default();
        let config = Config {
            output: Some(PathBuf::from("out/custom.jsonl")),
            concurrency: Some(3),
            max_fixes: Some(0),
            key: Some("sk-cli".to_string()),
            ..Config::default()
        };
        config.apply(&mut settings);
        assert_eq!(settings.output_path, PathBuf::from("out/custom.jsonl"));
        assert_eq!(settings.concurrency, 3);
        assert_eq!(settings.max_fixes, 0);
        assert_eq!(settings.api_key, "sk-cli");
        assert_eq!(settings.model, Settings::default().model);
    }

    #[test]
    fn summary_lists_only_relevant_counters() {
        let summary = BatchSummary {
            records: 3,
            translated: 2,
            passthrough: 1,
            fix_passes: 1,
            exhausted: 1,
            usage: UsageTotals {
                prompt_tokens: 30,
                completion_tokens: 6,
                total_tokens: 36,
            },
            ..BatchSummary::default()
        };
        assert_eq!(
            format_summary(&summary),
            "records: 3\ntranslated: 2\nunchanged: 1\nfix passes: 1\nstill chinese: 1\ntokens: prompt=30, completion=6, total=36"
        );
        assert!(format_summary(&BatchSummary::default()).ends_with("tokens: unavailable"));

        let crashed = BatchSummary {
            records: 1,
            failed_runs: 1,
            ..BatchSummary::default()
        };
        let text = format_summary(&crashed);
        assert!(text.contains("crashed runs: 1"));
        assert!(!text.contains("failed writes"));
    }

    #[tokio::test]
    async fn missing_input_is_fatal_before_output_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            input_path: dir.path().join("missing.jsonl"),
            output_path: dir.path().join("out/result.jsonl"),
            ..Settings::default()
        };
        let err = run_with_settings(settings).await.unwrap_err();
        assert!(err.to_string().contains("input file not found"));
        assert!(!dir.path().join("out").exists());
    }
}
