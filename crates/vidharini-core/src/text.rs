pub const TITLE_MAX_CHARS: usize = 50;

pub fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    let len = s.len();
    if index >= len {
        return len;
    }

    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }

    index
}

/// Chat title from the first user message: at most `max_chars` characters,
/// with `...` appended when anything was cut.
pub fn derive_chat_title(first_message: &str, max_chars: usize) -> String {
    match first_message.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &first_message[..cut]),
        None => first_message.to_string(),
    }
}

/// Shortens text for log lines.
pub fn preview(text: &str, max_bytes: usize) -> &str {
    &text[..floor_char_boundary(text, max_bytes)]
}
