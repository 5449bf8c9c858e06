//! Quality gates for generated DJ lines and synthesized audio.
//!
//! Text must read like a human host wrote it: bounded length, no
//! machine-flavored vocabulary, and the artist's name preserved when there
//! is one. Audio must exist, have substance, and carry the magic bytes of a
//! supported container.

use std::fmt;
use std::path::Path;

use crate::config::TextGuardrails;
use crate::utils::is_generic_artist;

/// Why a generated line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityIssue {
    /// Shorter than the configured minimum.
    TooShort {
        /// Observed length in characters.
        len: usize,
        /// Configured minimum.
        min: usize,
    },
    /// Longer than the configured maximum.
    TooLong {
        /// Observed length in characters.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Contains a word from the forbidden list.
    ForbiddenToken(String),
    /// The artist's name is missing from the line.
    MissingArtist,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len, min } => write!(f, "text too short ({} < {})", len, min),
            Self::TooLong { len, max } => write!(f, "text too long ({} > {})", len, max),
            Self::ForbiddenToken(word) => write!(f, "forbidden token \"{}\"", word),
            Self::MissingArtist => write!(f, "artist name missing from text"),
        }
    }
}

/// Runs all text gates in order; the first failure wins.
pub fn check_text(
    text: &str,
    guardrails: &TextGuardrails,
    artist: &str,
) -> Result<(), QualityIssue> {
    let len = text.chars().count();
    if len < guardrails.min_chars {
        return Err(QualityIssue::TooShort {
            len,
            min: guardrails.min_chars,
        });
    }
    if len > guardrails.max_chars {
        return Err(QualityIssue::TooLong {
            len,
            max: guardrails.max_chars,
        });
    }

    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    for forbidden in &guardrails.forbidden {
        let needle = forbidden.to_lowercase();
        let hit = if needle.contains(char::is_whitespace) {
            lowered.contains(&needle)
        } else {
            // Whole-word match: "ai" must flag "AI" but not "rain".
            words.iter().any(|w| *w == needle)
        };
        if hit {
            return Err(QualityIssue::ForbiddenToken(forbidden.clone()));
        }
    }

    if !is_generic_artist(artist) && !lowered.contains(&artist.to_lowercase()) {
        return Err(QualityIssue::MissingArtist);
    }

    Ok(())
}

/// Why a synthesized audio file was rejected.
#[derive(Debug)]
pub enum AudioIssue {
    /// The file does not exist or cannot be read.
    Missing(std::io::Error),
    /// Smaller than the configured minimum.
    TooSmall {
        /// Observed size in bytes.
        size: u64,
        /// Configured minimum.
        min: u64,
    },
    /// The leading bytes match no supported audio container.
    UnknownContainer,
}

impl fmt::Display for AudioIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(e) => write!(f, "audio file unreadable: {}", e),
            Self::TooSmall { size, min } => write!(f, "audio too small ({} < {} bytes)", size, min),
            Self::UnknownContainer => write!(f, "unsupported audio container"),
        }
    }
}

/// Validated facts about a synthesized file.
#[derive(Debug, Clone, Copy)]
pub struct AudioProbe {
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Validates a synthesized audio file: exists, big enough, known container.
pub fn check_audio(path: &Path, min_bytes: u64) -> Result<AudioProbe, AudioIssue> {
    let meta = std::fs::metadata(path).map_err(AudioIssue::Missing)?;
    let size = meta.len();
    if size < min_bytes {
        return Err(AudioIssue::TooSmall {
            size,
            min: min_bytes,
        });
    }

    let mut head = [0_u8; 12];
    let read = {
        use std::io::Read;
        let mut file = std::fs::File::open(path).map_err(AudioIssue::Missing)?;
        file.read(&mut head).map_err(AudioIssue::Missing)?
    };
    if !has_supported_magic(&head[..read]) {
        return Err(AudioIssue::UnknownContainer);
    }

    Ok(AudioProbe { size_bytes: size })
}

/// Magic-byte sniff for MP3 (ID3 or bare MPEG sync), WAV, Ogg, and FLAC.
fn has_supported_magic(head: &[u8]) -> bool {
    if head.len() < 4 {
        return false;
    }
    head.starts_with(b"ID3")
        || (head[0] == 0xFF && head[1] & 0xE0 == 0xE0)
        || head.starts_with(b"RIFF")
        || head.starts_with(b"OggS")
        || head.starts_with(b"fLaC")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardrails() -> TextGuardrails {
        TextGuardrails::default()
    }

    #[test]
    fn accepts_a_human_sounding_line() {
        let text = "Up next, it's Nina Simone with Feeling Good.";
        assert_eq!(check_text(text, &guardrails(), "Nina Simone"), Ok(()));
    }

    #[test]
    fn rejects_short_and_long_text() {
        assert!(matches!(
            check_text("Hi", &guardrails(), ""),
            Err(QualityIssue::TooShort { .. })
        ));
        let long = "x".repeat(300);
        assert!(matches!(
            check_text(&long, &guardrails(), ""),
            Err(QualityIssue::TooLong { .. })
        ));
    }

    #[test]
    fn forbidden_tokens_match_whole_words_only() {
        // "AI" as a word is flagged...
        assert!(matches!(
            check_text("This AI picked a song for you", &guardrails(), ""),
            Err(QualityIssue::ForbiddenToken(_))
        ));
        // ...but "rain" and "maintain" are not.
        assert_eq!(
            check_text("Dancing in the rain, we maintain the groove", &guardrails(), ""),
            Ok(())
        );
    }

    #[test]
    fn artist_must_appear_when_not_generic() {
        assert!(matches!(
            check_text("Here's a lovely tune for you tonight", &guardrails(), "Nina Simone"),
            Err(QualityIssue::MissingArtist)
        ));
        // Case-insensitive match satisfies the gate.
        assert_eq!(
            check_text("here's NINA SIMONE for you tonight", &guardrails(), "Nina Simone"),
            Ok(())
        );
        // Generic artists are exempt.
        assert_eq!(
            check_text("Here's a lovely tune for you tonight", &guardrails(), "Various Artists"),
            Ok(())
        );
    }

    #[test]
    fn audio_magic_accepts_supported_containers() {
        assert!(has_supported_magic(b"ID3\x04\x00rest"));
        assert!(has_supported_magic(&[0xFF, 0xFB, 0x90, 0x00]));
        assert!(has_supported_magic(b"RIFF....WAVE"));
        assert!(has_supported_magic(b"OggS\x00\x02"));
        assert!(has_supported_magic(b"fLaC...."));
        assert!(!has_supported_magic(b"\x89PNG"));
        assert!(!has_supported_magic(b"ab"));
    }

    #[test]
    fn audio_checks_size_and_container() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("nope.mp3");
        assert!(matches!(
            check_audio(&missing, 10),
            Err(AudioIssue::Missing(_))
        ));

        let tiny = dir.path().join("tiny.mp3");
        std::fs::write(&tiny, b"ID3").unwrap();
        assert!(matches!(
            check_audio(&tiny, 1_000),
            Err(AudioIssue::TooSmall { .. })
        ));

        let wrong = dir.path().join("wrong.mp3");
        std::fs::write(&wrong, vec![0_u8; 2_000]).unwrap();
        assert!(matches!(
            check_audio(&wrong, 1_000),
            Err(AudioIssue::UnknownContainer)
        ));

        let good = dir.path().join("good.mp3");
        let mut bytes = b"ID3\x04\x00\x00".to_vec();
        bytes.resize(2_000, 0);
        std::fs::write(&good, bytes).unwrap();
        let probe = check_audio(&good, 1_000).unwrap();
        assert_eq!(probe.size_bytes, 2_000);
    }
}
