mod fetch;
mod parse;

pub use fetch::{fetch_feed, fetch_feed_bytes, file_path_to_url, is_url, parse_feed_file};
pub use parse::{Feed, parse_duration, parse_feed, stable_id};
