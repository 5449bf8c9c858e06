//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};
use unicode_normalization::UnicodeNormalization;

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Clamps an event timestamp to within one day of server time.
///
/// Out-of-range timestamps are replaced with the current server time so a
/// client with a broken clock cannot scramble history ordering.
#[must_use]
pub fn clamp_epoch_ms(epoch_ms: Option<u64>) -> u64 {
    const ONE_DAY_MS: u64 = 24 * 60 * 60 * 1000;
    let now = now_millis();
    match epoch_ms {
        Some(t) if t.abs_diff(now) <= ONE_DAY_MS => t,
        _ => now,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Text Normalization
// ─────────────────────────────────────────────────────────────────────────────

/// Normalizes a metadata tag (title, artist, album) for storage and comparison.
///
/// Applies Unicode NFC normalization and trims surrounding whitespace, so the
/// same track reported by different sources produces identical dedup keys.
#[must_use]
pub fn normalize_tag(s: &str) -> String {
    s.trim().nfc().collect()
}

/// Returns true when an artist tag carries no usable identity.
///
/// Generic placeholders must not be required to appear in generated DJ text.
#[must_use]
pub fn is_generic_artist(artist: &str) -> bool {
    let a = artist.trim();
    a.is_empty()
        || a.eq_ignore_ascii_case("unknown")
        || a.eq_ignore_ascii_case("unknown artist")
        || a.eq_ignore_ascii_case("various")
        || a.eq_ignore_ascii_case("various artists")
        || a.eq_ignore_ascii_case("va")
}

// ─────────────────────────────────────────────────────────────────────────────
// Fingerprints
// ─────────────────────────────────────────────────────────────────────────────

/// Computes a stable hex fingerprint over a list of string parts.
///
/// Parts are joined with a unit separator so `("ab", "c")` and `("a", "bc")`
/// hash differently.
#[must_use]
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f_u8]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Cache key for artwork looked up by artist/album pair.
#[must_use]
pub fn artwork_key_for_album(artist: &str, album: &str) -> String {
    fingerprint(&[
        "album",
        &normalize_tag(artist).to_lowercase(),
        &normalize_tag(album).to_lowercase(),
    ])
}

/// Cache key for artwork extracted from a specific media file path.
#[must_use]
pub fn artwork_key_for_file(path: &str) -> String {
    fingerprint(&["file", path])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_recomposes() {
        // U+0065 U+0301 (e + combining acute) must compose to U+00E9
        assert_eq!(normalize_tag("  Cafe\u{0301}  "), "Caf\u{00e9}");
        assert_eq!(normalize_tag("Plain"), "Plain");
    }

    #[test]
    fn clamp_replaces_out_of_range_timestamps() {
        let now = now_millis();
        assert_eq!(clamp_epoch_ms(Some(now)), now);
        // Two days in the past is replaced with server time
        let stale = now - 2 * 24 * 60 * 60 * 1000;
        assert!(clamp_epoch_ms(Some(stale)) >= now);
        assert!(clamp_epoch_ms(None) >= now);
    }

    #[test]
    fn fingerprint_respects_part_boundaries() {
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
        assert_eq!(fingerprint(&["a", "b"]), fingerprint(&["a", "b"]));
    }

    #[test]
    fn generic_artists_detected() {
        assert!(is_generic_artist(""));
        assert!(is_generic_artist("  "));
        assert!(is_generic_artist("Unknown Artist"));
        assert!(is_generic_artist("various artists"));
        assert!(!is_generic_artist("Nina Simone"));
    }

    #[test]
    fn album_keys_are_case_insensitive() {
        assert_eq!(
            artwork_key_for_album("Miles Davis", "Kind of Blue"),
            artwork_key_for_album("miles davis", "KIND OF BLUE")
        );
        assert_ne!(
            artwork_key_for_album("Miles Davis", "Kind of Blue"),
            artwork_key_for_file("Miles Davis")
        );
    }
}
