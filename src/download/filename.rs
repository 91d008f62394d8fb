// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use sha2::{Digest, Sha256};
use url::Url;

/// Maximum length for the readable portion of a local filename
const MAX_STEM_LENGTH: usize = 80;

/// Number of hex digits of the source hash appended to every filename
const HASH_LENGTH: usize = 12;

/// Check if a character is allowed in filenames (whitelist approach)
fn is_valid_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' ')
}

/// Deterministic local filename for a source URL
///
/// Format: `<sanitized-stem>-<hash>.<ext>`. The stem comes from the last path
/// segment and is bounded in length; the hash of the full URL keeps two
/// sources that share a file name (`episode.mp3` on different hosts) apart.
pub fn local_filename(source: &Url) -> String {
    let stem = source
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| match segment.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => segment,
        })
        .map(sanitize_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "episode".to_string());

    let filename = format!(
        "{}-{}.{}",
        stem,
        source_hash(source),
        audio_extension(source)
    );

    let options = sanitize_filename::Options {
        windows: true,
        truncate: true,
        replacement: "-",
    };
    sanitize_filename::sanitize_with_options(filename, options)
}

/// Get the audio file extension from a source URL, defaulting to "mp3"
pub fn audio_extension(source: &Url) -> String {
    source
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|filename| filename.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| is_valid_audio_extension(ext))
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "mp3".to_string())
}

fn source_hash(source: &Url) -> String {
    let digest = Sha256::digest(source.as_str().as_bytes());
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(HASH_LENGTH)
        .collect()
}

/// Sanitize a URL path stem using the whitelist
fn sanitize_stem(stem: &str) -> String {
    let sanitized: String = stem
        .chars()
        .map(|c| if is_valid_filename_char(c) { c } else { '-' })
        .collect();

    let collapsed = collapse_separators(&sanitized);
    let trimmed = collapsed.trim_matches(|c: char| c == '-' || c.is_whitespace());

    truncate_at_boundary(trimmed, MAX_STEM_LENGTH)
}

/// Collapse multiple spaces and dashes into single dashes
fn collapse_separators(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_separator = false;

    for c in s.chars() {
        if c == '-' || c.is_whitespace() {
            if !last_was_separator {
                result.push('-');
                last_was_separator = true;
            }
        } else {
            result.push(c);
            last_was_separator = false;
        }
    }

    result
}

/// Truncate string at a word boundary
fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    // Input is ASCII after sanitizing, so byte and char positions agree
    let truncated: String = s.chars().take(max_len).collect();
    if let Some(pos) = truncated.rfind('-')
        && pos > max_len / 2
    {
        return truncated[..pos].to_string();
    }

    truncated.trim_end_matches('-').to_string()
}

/// Check if a string is a valid audio file extension
fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "opus" | "wav" | "flac"
    )
}
