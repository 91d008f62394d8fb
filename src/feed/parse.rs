// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::FeedError;
use crate::model::{Episode, Show};

/// A parsed podcast feed: the channel as a show plus its episodes
#[derive(Debug, Clone)]
pub struct Feed {
    pub show: Show,
    pub episodes: Vec<Episode>,
}

/// Parse RSS feed XML bytes into a show and its episodes
///
/// Items without an enclosure are skipped; they have nothing to play.
pub fn parse_feed(xml_bytes: &[u8], feed_url: &Url) -> Result<Feed, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let image_url = channel
        .image()
        .and_then(|img| Url::parse(img.url()).ok())
        .or_else(|| {
            channel
                .itunes_ext()
                .and_then(|ext| ext.image())
                .and_then(|url| Url::parse(url).ok())
        });

    let author = channel
        .itunes_ext()
        .and_then(|ext| ext.author().map(clean_text))
        .or_else(|| channel.managing_editor().map(clean_text));

    let genre = channel
        .itunes_ext()
        .and_then(|ext| ext.categories().first().map(|c| c.text().to_string()));

    let show = Show {
        id: stable_id(feed_url.as_str()),
        title: clean_text(channel.title()),
        artist: author,
        feed_url: Some(feed_url.to_string()),
        artwork_url: image_url,
        genre,
    };

    let episodes = channel
        .items()
        .iter()
        .filter_map(|item| parse_episode(item, &show).ok())
        .collect();

    Ok(Feed { show, episodes })
}

fn parse_episode(item: &rss::Item, show: &Show) -> Result<Episode, FeedError> {
    let title = item
        .title()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Episode".to_string());

    let enclosure = item
        .enclosure()
        .ok_or_else(|| FeedError::MissingEnclosure {
            title: title.clone(),
        })?;

    let enclosure_url = Url::parse(enclosure.url().trim())?;

    let release_date = item.pub_date().and_then(|date_str| {
        DateTime::parse_from_rfc2822(date_str.trim())
            .or_else(|_| parse_relaxed_date(date_str.trim()))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    });

    let itunes = item.itunes_ext();

    let description = item
        .description()
        .or_else(|| itunes.and_then(|ext| ext.summary()))
        .or_else(|| item.content())
        .map(clean_text)
        .filter(|d| !d.is_empty());

    let artwork_url = itunes
        .and_then(|ext| ext.image())
        .and_then(|href| Url::parse(href).ok());

    Ok(Episode {
        id: stable_id(enclosure_url.as_str()),
        title,
        description,
        release_date,
        duration_secs: itunes
            .and_then(|ext| ext.duration())
            .and_then(parse_duration)
            .map(|secs| secs as f64),
        stream_url: Some(enclosure_url),
        artwork_url,
        show_id: show.id,
        show_title: Some(show.title.clone()),
    })
}

/// Derive a stable numeric id from a URL or other identifying string
///
/// Uses the first eight bytes of a SHA-256 digest, so ids survive restarts.
pub fn stable_id(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    // Keep the id positive when stored as a signed 64-bit integer
    u64::from_be_bytes(bytes) & (i64::MAX as u64)
}

/// Parse an `itunes:duration` value: `hh:mm:ss`, `mm:ss` or plain seconds
pub fn parse_duration(value: &str) -> Option<u64> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    let numbers: Option<Vec<u64>> = parts.iter().map(|p| p.trim().parse().ok()).collect();

    // Out-of-range values are rejected rather than wrapped
    let (hours, minutes, seconds) = match numbers?.as_slice() {
        [hours, minutes, seconds] => (*hours, *minutes, *seconds),
        [minutes, seconds] => (0, *minutes, *seconds),
        [seconds] => (0, 0, *seconds),
        _ => return None,
    };

    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// Decode HTML entities, drop line breaks and trim
fn clean_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    decoded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    let mut last_error = None;
    for format in formats {
        match DateTime::parse_from_str(date_str, format) {
            Ok(dt) => return Ok(dt),
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => DateTime::parse_from_rfc3339(date_str),
    }
}
