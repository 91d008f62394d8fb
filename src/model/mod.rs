mod episode;
mod show;

pub use episode::{Episode, canonical_source};
pub use show::Show;
