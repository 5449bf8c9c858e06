//! Line-oriented control protocol codec.
//!
//! The engine's control port speaks newline-terminated commands. Responses
//! run until a sentinel line (`END`); metadata queries answer with
//! `key="value"` blocks whose values may carry `\uXXXX`-escaped filenames.

use std::collections::HashMap;

/// Line that terminates every engine response.
pub const RESPONSE_SENTINEL: &str = "END";

/// Command that closes the control session.
pub const QUIT_COMMAND: &str = "quit";

/// Parses the response to `request.all`: request ids separated by spaces,
/// possibly spread over several lines.
#[must_use]
pub fn parse_id_list(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .flat_map(|line| line.split_whitespace())
        .filter(|tok| tok.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// Parses a `key="value"` metadata block into a map.
///
/// Lines that do not match the shape are skipped; values are unescaped.
/// Later occurrences of a key win, matching how the engine emits overridden
/// annotations last.
#[must_use]
pub fn parse_kv_block(lines: &[String]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in lines {
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let rest = rest.trim();
        if key.is_empty() || !rest.starts_with('"') || !rest.ends_with('"') || rest.len() < 2 {
            continue;
        }
        let raw = &rest[1..rest.len() - 1];
        out.insert(key.to_string(), unescape_value(raw));
    }
    out
}

/// Unescapes a quoted metadata value.
///
/// Handles `\"`, `\\`, `\n`, `\t`, and `\uXXXX` (the engine escapes non-ASCII
/// filename bytes this way). Unknown escapes are kept verbatim.
#[must_use]
pub fn unescape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let code: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&code, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&code);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Escapes a value for inclusion inside an `annotate:` metadata pair.
#[must_use]
pub fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds an `annotate:`-prefixed URI carrying metadata pairs.
///
/// The engine round-trips these pairs in its track-change webhook, which is
/// how a spoken segment's artifact id finds its way back to the store.
#[must_use]
pub fn annotate_uri(pairs: &[(&str, &str)], uri: &str) -> String {
    if pairs.is_empty() {
        return uri.to_string();
    }
    let meta = pairs
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_value(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("annotate:{}:{}", meta, uri)
}

/// True when a response line signals an explicit engine refusal.
#[must_use]
pub fn is_error_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("ERROR") || line.starts_with("Error:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn id_list_spans_lines_and_ignores_noise() {
        let ids = parse_id_list(&lines(&["12 13", "14", "ready"]));
        assert_eq!(ids, vec!["12", "13", "14"]);
        assert!(parse_id_list(&lines(&[])).is_empty());
    }

    #[test]
    fn kv_block_parses_quoted_pairs() {
        let kv = parse_kv_block(&lines(&[
            "title=\"Blue in Green\"",
            "artist=\"Miles Davis\"",
            "filename=\"/music/kind_of_blue/03.mp3\"",
            "not a pair",
            "empty=",
        ]));
        assert_eq!(kv.get("title").unwrap(), "Blue in Green");
        assert_eq!(kv.get("artist").unwrap(), "Miles Davis");
        assert_eq!(kv.len(), 3);
    }

    #[test]
    fn kv_block_later_keys_win() {
        let kv = parse_kv_block(&lines(&["title=\"a\"", "title=\"b\""]));
        assert_eq!(kv.get("title").unwrap(), "b");
    }

    #[test]
    fn unescape_handles_unicode_filenames() {
        assert_eq!(unescape_value("caf\\u00e9.mp3"), "caf\u{e9}.mp3");
        assert_eq!(unescape_value("a\\\"b\\\\c"), "a\"b\\c");
        // Truncated escape is preserved rather than dropped
        assert_eq!(unescape_value("bad\\uZZ"), "bad\\uZZ");
        assert_eq!(unescape_value("trailing\\"), "trailing\\");
    }

    #[test]
    fn annotate_builds_metadata_prefix() {
        let uri = annotate_uri(
            &[("kind", "dj"), ("title", "Say \"hi\"")],
            "file:///tts/intro_1.mp3",
        );
        assert_eq!(
            uri,
            "annotate:kind=\"dj\",title=\"Say \\\"hi\\\"\":file:///tts/intro_1.mp3"
        );
        assert_eq!(annotate_uri(&[], "file:///x"), "file:///x");
    }

    #[test]
    fn error_lines_detected() {
        assert!(is_error_line("ERROR: unknown queue"));
        assert!(is_error_line("  Error: no such request"));
        assert!(!is_error_line("42"));
    }
}
