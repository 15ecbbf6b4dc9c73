//! Text-delta cleanup.
//!
//! Some server builds leak the base64 audio payload into the text stream.
//! Those runs are removed before the delta reaches the conversation, and
//! message length is capped.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::{Captures, Regex};

use crate::chat::core::errors::ChatResult;

/// Shortest bare base64 run treated as leaked audio.
pub const MIN_BASE64_RUN: usize = 200;

/// Marker appended once when a message hits the length ceiling.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Compiled cleanup rules.
#[derive(Clone, Debug)]
pub struct Sanitizer {
    audio_data_uri: Regex,
    base64_run: Regex,
    max_chars: usize,
}

impl Sanitizer {
    /// Build a sanitizer capping messages at `max_chars`.
    ///
    /// # Errors
    /// Returns an error if a pattern fails to compile.
    pub fn new(max_chars: usize) -> ChatResult<Self> {
        Ok(Self {
            audio_data_uri: Regex::new(r"data:audio/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]*")?,
            base64_run: Regex::new(&format!(r"[A-Za-z0-9+/]{{{MIN_BASE64_RUN},}}={{0,2}}"))?,
            max_chars,
        })
    }

    /// Remove inline audio payloads from a text delta.
    #[must_use]
    pub fn strip_audio_payloads(&self, delta: &str) -> String {
        let without_uris = self.audio_data_uri.replace_all(delta, "");
        self.base64_run
            .replace_all(&without_uris, |caps: &Captures<'_>| {
                let run = &caps[0];
                if decodes_as_base64(run) {
                    String::new()
                } else {
                    run.to_string()
                }
            })
            .into_owned()
    }

    /// Append `delta` to `content` without exceeding the ceiling.
    ///
    /// Returns `false` once the message is full; the truncation marker is
    /// added the first time the ceiling is hit.
    pub fn bounded_append(&self, content: &mut String, delta: &str) -> bool {
        if content.ends_with(TRUNCATION_MARKER) {
            return false;
        }
        let room = self.max_chars.saturating_sub(content.chars().count());
        if delta.chars().count() <= room {
            content.push_str(delta);
            return true;
        }
        content.extend(delta.chars().take(room));
        content.push_str(TRUNCATION_MARKER);
        false
    }
}

fn decodes_as_base64(run: &str) -> bool {
    run.len() % 4 == 0 && STANDARD.decode(run).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_blob(len: usize) -> String {
        STANDARD.encode(vec![7_u8; len])
    }

    fn sanitizer(max_chars: usize) -> Sanitizer {
        Sanitizer::new(max_chars).unwrap()
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "Hello, world! Here is some code: a+b/c == d";
        assert_eq!(sanitizer(100).strip_audio_payloads(text), text);
    }

    #[test]
    fn test_data_uri_removed() {
        let delta = format!("Listen: data:audio/mp3;base64,{} done", audio_blob(30));
        assert_eq!(sanitizer(100).strip_audio_payloads(&delta), "Listen:  done");
    }

    #[test]
    fn test_long_base64_run_removed() {
        let delta = format!("before {} after", audio_blob(300));
        assert_eq!(sanitizer(100).strip_audio_payloads(&delta), "before  after");
    }

    #[test]
    fn test_short_or_invalid_runs_kept() {
        let s = sanitizer(100);
        let short = audio_blob(30);
        assert_eq!(s.strip_audio_payloads(&short), short);
        // Right alphabet, wrong length for base64.
        let odd = "a".repeat(MIN_BASE64_RUN + 1);
        assert_eq!(s.strip_audio_payloads(&odd), odd);
    }

    #[test]
    fn test_bounded_append_truncates_once() {
        let s = sanitizer(6);
        let mut content = String::from("abc");
        assert!(s.bounded_append(&mut content, "de"));
        assert!(!s.bounded_append(&mut content, "fgh"));
        assert_eq!(content, format!("abcdef{TRUNCATION_MARKER}"));
        assert!(!s.bounded_append(&mut content, "more"));
        assert_eq!(content, format!("abcdef{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_bounded_append_counts_chars_not_bytes() {
        let mut content = String::new();
        assert!(sanitizer(3).bounded_append(&mut content, "ééé"));
        assert_eq!(content.chars().count(), 3);
    }
}
