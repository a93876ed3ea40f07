pub mod command;
pub mod http;
pub mod path;

/// Keep at most `limit` characters from the end of `text`.
///
/// Tools print their actual error last, after banners and progress output.
pub fn truncate_diagnostic(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }

    let tail: String = text.chars().skip(count - limit).collect();
    format!("...{tail}")
}
