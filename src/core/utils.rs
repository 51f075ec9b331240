/// Truncate `text` to at most `max_bytes`, cutting on a char boundary.
pub fn excerpt(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Lossy UTF-8 view of captured process output
pub fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_keeps_short_text() {
        assert_eq!(excerpt("hello", 16), "hello");
    }

    #[test]
    fn test_excerpt_respects_char_boundary() {
        // "é" is two bytes; cutting at 2 would split it
        assert_eq!(excerpt("aé", 2), "a");
        assert_eq!(excerpt("abcdef", 3), "abc");
    }
}
