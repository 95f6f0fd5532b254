use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::Path;

use crate::settings::Settings;

const DEFAULT_TRANSLATE_PROMPT: &str = include_str!("../prompts/translate_system.txt");
const DEFAULT_FIX_PROMPT: &str = include_str!("../prompts/fix_system.txt");

/// System prompts for the two kinds of completion calls a record can make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub translate: String,
    pub fix: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            translate: DEFAULT_TRANSLATE_PROMPT.trim().to_string(),
            fix: DEFAULT_FIX_PROMPT.trim().to_string(),
        }
    }
}

pub fn load_prompts(settings: &Settings) -> Result<Prompts> {
    Ok(Prompts {
        translate: load_prompt(&settings.translate_prompt_path, DEFAULT_TRANSLATE_PROMPT)?,
        fix: load_prompt(&settings.fix_prompt_path, DEFAULT_FIX_PROMPT)?,
    })
}

fn load_prompt(path: &Path, fallback: &str) -> Result<String> {
    if !path.exists() {
        tracing::debug!("prompt {} not found; using built-in prompt", path.display());
        return Ok(fallback.trim().to_string());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt: {}", path.display()))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("prompt file is empty: {}", path.display()));
    }
    Ok(trimmed.to_string())
}
