//! Chat-template turn markers embedded in pretraining records.
//!
//! A record may hold several conversation turns joined as
//! `<|im_start|>a<|im_end|> <|im_start|>b<|im_end|>`. Translation works on the
//! bare turn bodies and puts the markers back afterwards.

pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";
pub const TURN_DELIMITER: &str = "<|im_end|> <|im_start|>";

pub fn split_turns(text: &str) -> Vec<&str> {
    text.split(TURN_DELIMITER).collect()
}

/// Removes every turn marker from a segment and trims the remainder.
pub fn strip_markers(segment: &str) -> String {
    segment
        .replace(IM_END, "")
        .replace(IM_START, "")
        .trim()
        .to_string()
}

pub fn has_turn_markers(text: &str) -> bool {
    text.contains(IM_START) || text.contains(IM_END)
}

pub fn join_turns<S: AsRef<str>>(segments: &[S], wrap: bool) -> String {
    let joined = segments
        .iter()
        .map(|segment| segment.as_ref())
        .collect::<Vec<_>>()
        .join(TURN_DELIMITER);
    if wrap {
        format!("{}{}{}", IM_START, joined, IM_END)
    } else {
        joined
    }
}
