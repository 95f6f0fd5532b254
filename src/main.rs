use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "zh2en-batch",
    version,
    about = "Translate Chinese text in a JSONL corpus to English with an OpenAI-compatible endpoint"
)]
struct Cli {
    /// Input JSONL file with a "text" field per line (env: INPUT_FILE)
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Output JSONL file, appended to (env: OUTPUT_PATH)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Model id served by the endpoint (env: MODEL_ID)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Endpoint base URL, e.g. http://127.0.0.1:8000/v1 (env: OPENAI_BASE_URL)
    #[arg(short = 'u', long = "base-url")]
    base_url: Option<String>,

    /// API key (overrides OPENAI_API_KEY)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Maximum records with completion calls in flight (env: CONCURRENCY)
    #[arg(short = 'c', long = "concurrency")]
    concurrency: Option<usize>,

    /// Fix passes allowed when Chinese remains after translation (env: MAX_FIXES)
    #[arg(long = "max-fixes")]
    max_fixes: Option<u32>,

    /// System prompt file for the translation pass
    #[arg(long = "translate-prompt")]
    translate_prompt: Option<PathBuf>,

    /// System prompt file for the fix pass
    #[arg(long = "fix-prompt")]
    fix_prompt: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    zh2en_batch::logging::init(cli.verbose)?;

    let summary = zh2en_batch::run(zh2en_batch::Config {
        input: cli.input,
        output: cli.output,
        model: cli.model,
        base_url: cli.base_url,
        key: cli.key,
        concurrency: cli.concurrency,
        max_fixes: cli.max_fixes,
        translate_prompt: cli.translate_prompt,
        fix_prompt: cli.fix_prompt,
        settings_path: cli.read_settings,
    })
    .await?;

    println!("{}", zh2en_batch::format_summary(&summary));
    Ok(())
}
