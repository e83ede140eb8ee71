use once_cell::sync::Lazy;
use regex::Regex;

/// Highlighted menu entry: a selection glyph, then optional ordinal and label
static RE_SELECTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[❯›▶]\s+(\S.*)$").unwrap());

fn is_question(line: &str) -> bool {
    line.ends_with('?') || line.ends_with(':')
}

fn is_bullet(line: &str) -> bool {
    line.starts_with('-') || line.starts_with('*')
}

/// First highlighted option in `lines`, e.g. "1. Yes"
fn find_default(lines: &[String]) -> Option<String> {
    lines.iter().find_map(|line| {
        RE_SELECTED
            .captures(line)
            .map(|caps| caps[1].trim().to_string())
    })
}

fn with_default(question: &str, default: Option<String>) -> String {
    match default {
        Some(answer) => format!("{}\n→ {}", question, answer),
        None => question.to_string(),
    }
}

/// Extract the prompt a session is blocked on from its recent logical lines.
///
/// The hook message wins when it already reads as a question. Otherwise the
/// nearest non-bullet line ending in `?` or `:` is used. A highlighted option
/// after the question is appended as the default answer. Returns an empty
/// string when nothing qualifies.
pub fn extract_question(lines: &[String], hook_message: &str) -> String {
    let hook_message = hook_message.trim();
    if is_question(hook_message) {
        return with_default(hook_message, find_default(lines));
    }

    let found = lines.iter().enumerate().rev().find_map(|(i, line)| {
        let line = line.trim();
        (!is_bullet(line) && is_question(line)).then_some((i, line))
    });

    match found {
        Some((idx, question)) => with_default(question, find_default(&lines[idx + 1..])),
        None => String::new(),
    }
}
