use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::pipeline::{Pipeline, Record, RunOutcome};
use crate::providers::{ChatProvider, UsageTotals};

#[derive(Debug, Deserialize)]
struct InputLine {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub records: usize,
    pub skipped_lines: usize,
    pub passthrough: usize,
    pub translated: usize,
    pub fix_passes: u64,
    pub exhausted: usize,
    pub failed_calls: usize,
    pub failed_writes: usize,
    pub failed_runs: usize,
    pub usage: UsageTotals,
}

impl BatchSummary {
    pub fn completed(&self) -> usize {
        self.passthrough + self.translated + self.failed_writes + self.failed_runs
    }

    fn absorb(&mut self, joined: Result<Result<RunOutcome>, JoinError>) {
        match joined {
            Ok(Ok(outcome)) => {
                if outcome.passthrough {
                    self.passthrough += 1;
                } else {
                    self.translated += 1;
                }
                self.fix_passes += u64::from(outcome.fix_passes);
                self.failed_calls += outcome.failed_calls;
                if outcome.exhausted {
                    self.exhausted += 1;
                }
                self.usage.merge(&outcome.usage);
            }
            Ok(Err(err)) => {
                error!("{:#}", err);
                self.failed_writes += 1;
            }
            Err(err) => {
                error!("pipeline task failed: {}", err);
                self.failed_runs += 1;
            }
        }
    }
}

/// Reads a JSONL corpus and runs one pipeline per record. Admission to the
/// network is bounded by the pipeline's gate; `max_pending` bounds how many
/// spawned runs may wait on it so huge inputs are not buffered in memory.
pub struct BatchDriver<P: ChatProvider> {
    pipeline: Arc<Pipeline<P>>,
    progress_every: usize,
    max_pending: usize,
}

impl<P: ChatProvider> BatchDriver<P> {
    pub fn new(pipeline: Pipeline<P>, concurrency: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            progress_every: 2000,
            max_pending: concurrency.max(1).saturating_mul(16),
        }
    }

    pub fn with_progress_every(mut self, progress_every: usize) -> Self {
        if progress_every > 0 {
            self.progress_every = progress_every;
        }
        self
    }

    pub async fn run(&self, input: &Path) -> Result<BatchSummary> {
        let file = File::open(input)
            .await
            .with_context(|| format!("input file not found: {}", input.display()))?;
        let mut lines = BufReader::new(file).split(b'\n');
        let mut tasks = JoinSet::new();
        let mut summary = BatchSummary::default();
        let mut line_no = 0usize;

        loop {
            let raw = match lines.next_segment().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(err) => {
                    // runs already scheduled still get persisted
                    self.drain(&mut tasks, &mut summary).await;
                    return Err(err)
                        .with_context(|| format!("failed to read input: {}", input.display()));
                }
            };
            line_no += 1;
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(err) => {
                    warn!("skipping line {}: {}", line_no, err);
                    summary.skipped_lines += 1;
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: InputLine = match serde_json::from_str(trimmed) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("skipping line {}: {}", line_no, err);
                    summary.skipped_lines += 1;
                    continue;
                }
            };

            summary.records += 1;
            let pipeline = self.pipeline.clone();
            let current = line_no;
            tasks.spawn(async move { pipeline.run(current, Record::new(parsed.text)).await });

            if summary.records % self.progress_every == 0 {
                info!("scheduled {} records", summary.records);
            }
            while tasks.len() >= self.max_pending {
                let Some(joined) = tasks.join_next().await else {
                    break;
                };
                self.absorb(&mut summary, joined);
            }
        }

        self.drain(&mut tasks, &mut summary).await;
        info!(
            "finished {} records ({} translated, {} unchanged)",
            summary.records, summary.translated, summary.passthrough
        );
        Ok(summary)
    }

    async fn drain(
        &self,
        tasks: &mut JoinSet<Result<RunOutcome>>,
        summary: &mut BatchSummary,
    ) {
        while let Some(joined) = tasks.join_next().await {
            self.absorb(summary, joined);
        }
    }

    fn absorb(&self, summary: &mut BatchSummary, joined: Result<Result<RunOutcome>, JoinError>) {
        summary.absorb(joined);
        let completed = summary.completed();
        if completed % self.progress_every == 0 {
            info!("completed {}/{} records", completed, summary.records);
        }
    }
}
