//! POSIX shell quoting helpers.

/// Quote a string as a single POSIX shell word.
///
/// Plain words pass through unchanged; anything else is wrapped in single
/// quotes with embedded quotes written as `'\''`.
pub fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if plain {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Join words into one shell command line, quoting each.
pub fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command as root without prompting.
///
/// `sudo -n` fails immediately instead of asking for a password, so a run
/// never blocks on a prompt halfway through.
pub fn sudo(command: &str) -> String {
    format!("sudo -n sh -c {}", quote(command))
}
