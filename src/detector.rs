use regex::Regex;
use std::sync::LazyLock;

// CJK Unified Ideographs, Extension A and Compatibility Ideographs
static CHINESE_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x{3400}-\x{4DBF}\x{4E00}-\x{9FFF}\x{F900}-\x{FAFF}]")
        .expect("chinese script pattern compiles")
});

/// Returns true when `text` contains at least one Chinese ideograph.
pub fn has_chinese_script(text: &str) -> bool {
    !text.is_empty() && CHINESE_SCRIPT.is_match(text)
}

pub fn count_chinese_chars(text: &str) -> usize {
    CHINESE_SCRIPT.find_iter(text).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_latin_text_is_not_chinese() {
        assert!(!has_chinese_script(""));
        assert!(!has_chinese_script("plain english only"));
        assert!(!has_chinese_script("<|im_start|>Hello<|im_end|>"));
    }

    #[test]
    fn detects_each_ideograph_block() {
        assert!(has_chinese_script("你好 world"));
        // Extension A
        assert!(has_chinese_script("\u{3400}"));
        assert!(has_chinese_script("x\u{4DBF}"));
        // Compatibility Ideographs
        assert!(has_chinese_script("\u{F900}"));
        assert!(has_chinese_script("\u{FAFF} tail"));
        assert!(has_chinese_script("\u{9FFF}"));
    }

    #[test]
    fn other_cjk_scripts_are_ignored() {
        // hiragana, katakana, hangul and fullwidth punctuation
        assert!(!has_chinese_script("こんにちは"));
        assert!(!has_chinese_script("カタカナ"));
        assert!(!has_chinese_script("안녕하세요"));
        assert!(!has_chinese_script("，。！"));
        assert!(!has_chinese_script("\u{4DC0}"));
    }

    #[test]
    fn counts_ideographs() {
        assert_eq!(count_chinese_chars("你好 world 世界"), 4);
        assert_eq!(count_chinese_chars("none"), 0);
    }
}
