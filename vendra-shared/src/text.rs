/// Truncate a provider-supplied message to a bounded length, on a char
/// boundary, appending an ellipsis when anything was cut.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }

    let kept: String = message.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}
