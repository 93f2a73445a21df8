//! POSIX shell quoting for values written into job scripts

/// Quote a single word so bash reads it back unchanged
///
/// Words made only of characters that are safe in an unquoted context are returned as-is, which
/// keeps the common case (`demo.py`, `logs/log-demo.o`) readable in rendered scripts.
pub fn shell_escape(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    if word.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,".contains(c)) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Quote every word and join them with single spaces
pub fn join<'a, I>(words: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    words.into_iter().map(shell_escape).collect::<Vec<_>>().join(" ")
}
