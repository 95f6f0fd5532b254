use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use crate::detector::{count_chinese_chars, has_chinese_script};
use crate::prompts::Prompts;
use crate::providers::{ChatProvider, UsageTotals};
use crate::settings::Settings;
use crate::turns::{has_turn_markers, join_turns, split_turns, strip_markers};
use crate::writer::OutputWriter;

mod state;

pub use state::{Record, Stage, next_stage};

pub const TRANSLATE_PREFIX: &str = "translate CN/ZH to EN: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub max_fixes: u32,
    pub max_tokens: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_fixes: 1,
            max_tokens: 5120,
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_fixes: settings.max_fixes,
            max_tokens: settings.max_tokens,
        }
    }
}

/// What one run did, for the batch summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub segments: usize,
    pub calls: usize,
    pub failed_calls: usize,
    pub fix_passes: u32,
    pub passthrough: bool,
    pub exhausted: bool,
    pub usage: UsageTotals,
}

/// The per-record state machine. One `Pipeline` is shared by every run of a
/// batch; runs only share the provider config, the admission gate and the
/// output writer.
pub struct Pipeline<P: ChatProvider> {
    provider: P,
    prompts: Prompts,
    writer: OutputWriter,
    gate: Arc<Semaphore>,
    options: PipelineOptions,
}

impl<P: ChatProvider> Pipeline<P> {
    pub fn new(
        provider: P,
        prompts: Prompts,
        writer: OutputWriter,
        gate: Arc<Semaphore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            provider,
            prompts,
            writer,
            gate,
            options,
        }
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Drives `record` from detection to the output file. Completion failures
    /// degrade to empty segments; only a failed append is returned as an error.
    pub async fn run(&self, line: usize, mut record: Record) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();
        let mut permit: Option<SemaphorePermit<'_>> = None;
        let wrap = has_turn_markers(&record.source_text);
        let mut stage = Stage::DetectAndTranslate;

        loop {
            debug!("line {}: {}", line, stage.as_str());
            match stage {
                Stage::DetectAndTranslate => {
                    if has_chinese_script(&record.source_text) {
                        permit = Some(self.admit().await?);
                        let source = record.source_text.clone();
                        record.translated_text = self
                            .translate_turns(
                                &source,
                                wrap,
                                &self.prompts.translate,
                                &mut record,
                                &mut outcome,
                            )
                            .await;
                    } else {
                        record.translated_text = record.source_text.clone();
                        outcome.passthrough = true;
                    }
                    record.revalidate();
                }
                Stage::Validate => record.revalidate(),
                Stage::FixPass => {
                    record.attempts += 1;
                    outcome.fix_passes = record.attempts;
                    let current = record.translated_text.clone();
                    record.translated_text = self
                        .translate_turns(
                            &current,
                            wrap,
                            &self.prompts.fix,
                            &mut record,
                            &mut outcome,
                        )
                        .await;
                    record.revalidate();
                }
                Stage::WritePersist => {
                    drop(permit.take());
                    if record.needs_fix {
                        outcome.exhausted = true;
                        warn!(
                            "line {}: {} Chinese characters remain after {} fix pass(es)",
                            line,
                            count_chinese_chars(&record.translated_text),
                            record.attempts
                        );
                    }
                    self.writer
                        .append(&record.translated_text)
                        .await
                        .with_context(|| format!("failed to persist line {}", line))?;
                }
                Stage::Done => break,
            }
            stage = next_stage(
                stage,
                record.needs_fix,
                record.attempts,
                self.options.max_fixes,
            );
        }

        Ok(outcome)
    }

    async fn admit(&self) -> Result<SemaphorePermit<'_>> {
        self.gate
            .acquire()
            .await
            .with_context(|| "admission gate closed")
    }

    async fn translate_turns(
        &self,
        text: &str,
        wrap: bool,
        system_prompt: &str,
        record: &mut Record,
        outcome: &mut RunOutcome,
    ) -> String {
        let segments = split_turns(text);
        outcome.segments = segments.len();
        let mut translated = Vec::with_capacity(segments.len());
        for segment in segments {
            let body = strip_markers(segment);
            if body.is_empty() {
                translated.push(String::new());
                continue;
            }
            let text = self
                .complete_segment(system_prompt, &body, record, outcome)
                .await;
            translated.push(text);
        }
        join_turns(&translated, wrap).trim().to_string()
    }

    async fn complete_segment(
        &self,
        system_prompt: &str,
        body: &str,
        record: &mut Record,
        outcome: &mut RunOutcome,
    ) -> String {
        outcome.calls += 1;
        let response = self
            .provider
            .clone()
            .append_system_input(system_prompt.to_string())
            .append_user_input(format!("{}{}", TRANSLATE_PREFIX, body))
            .with_max_tokens(self.options.max_tokens)
            .complete()
            .await;

        let failure = match response {
            Ok(response) => {
                if let Some(usage) = response.usage.as_ref() {
                    outcome.usage.add(usage);
                }
                match response.text.map(|text| text.trim().to_string()) {
                    Some(text) if !text.is_empty() => return text,
                    _ => "completion returned no content".to_string(),
                }
            }
            Err(err) => format!("{:#}", err),
        };
        warn!("completion failed; keeping empty segment: {}", failure);
        outcome.failed_calls += 1;
        record.last_error = Some(failure);
        String::new()
    }
}
