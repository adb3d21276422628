/// Appended to any text cut down to fit a budget.
pub const TRUNCATION_MARKER: &str = "[truncated]";

/// Approximate characters per model token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Cut `text` to at most `max_chars` characters.
///
/// Prefers to end at a sentence boundary when one falls within the last 30% of the
/// budget. Returns the (possibly marked) text and whether it was cut.
pub fn truncate_text(text: &str, max_chars: usize) -> (String, bool) {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return (text.to_string(), false);
    };

    let mut kept = &text[..cut];
    let floor = max_chars * 7 / 10;
    let boundary = [". ", ".\n", "! ", "?\n"]
        .iter()
        .filter_map(|end| kept.rfind(end))
        .max();
    if let Some(pos) = boundary {
        if kept[..pos].chars().count() > floor {
            kept = &kept[..=pos];
        }
    }

    (format!("{}\n\n{TRUNCATION_MARKER}", kept.trim_end()), true)
}
