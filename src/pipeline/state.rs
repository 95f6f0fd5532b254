use crate::detector::has_chinese_script;

/// One unit of work: a single input line on its way through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub source_text: String,
    pub translated_text: String,
    pub needs_fix: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Record {
    pub fn new(source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            ..Self::default()
        }
    }

    pub fn revalidate(&mut self) {
        self.needs_fix = has_chinese_script(&self.translated_text);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DetectAndTranslate,
    Validate,
    FixPass,
    WritePersist,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DetectAndTranslate => "detect_and_translate",
            Stage::Validate => "validate",
            Stage::FixPass => "fix_pass",
            Stage::WritePersist => "write_persist",
            Stage::Done => "done",
        }
    }
}

/// Transition table of the record state machine. A fix pass is only taken
/// while `attempts < max_fixes`, which bounds every run.
pub fn next_stage(current: Stage, needs_fix: bool, attempts: u32, max_fixes: u32) -> Stage {
    match current {
        Stage::DetectAndTranslate => Stage::Validate,
        Stage::Validate if needs_fix && attempts < max_fixes => Stage::FixPass,
        Stage::Validate => Stage::WritePersist,
        Stage::FixPass => Stage::Validate,
        Stage::WritePersist | Stage::Done => Stage::Done,
    }
}
