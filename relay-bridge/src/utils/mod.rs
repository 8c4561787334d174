pub mod http_client;

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &str) -> std::path::PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = std::env::var("HOME")
                .or_else(|_| std::env::var("USERPROFILE"))
                .unwrap_or_default();
            std::path::PathBuf::from(format!("{home}{rest}"))
        }
        None => std::path::PathBuf::from(path),
    }
}

/// Truncate `text` to at most `max` bytes on a char boundary, for log lines.
pub fn preview(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
