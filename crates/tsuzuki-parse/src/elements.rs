use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Categories a parsed value can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCategory {
    AnimeTitle,
    AnimeSeason,
    AnimeYear,
    AnimeType,
    EpisodeNumber,
    EpisodeNumberAlt,
    EpisodeTitle,
    ReleaseGroup,
    ReleaseVersion,
    ReleaseInformation,
    VideoResolution,
    VideoTerm,
    AudioTerm,
    Source,
    StreamingSource,
    Language,
    Subtitles,
    FileChecksum,
    FileExtension,
}

/// Multi-valued map of everything extracted from a release title.
///
/// Values keep their insertion order within a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Elements {
    map: BTreeMap<ElementCategory, Vec<String>>,
}

impl Elements {
    pub fn insert(&mut self, category: ElementCategory, value: impl Into<String>) {
        self.map.entry(category).or_default().push(value.into());
    }

    /// First value recorded for a category.
    pub fn get(&self, category: ElementCategory) -> Option<&str> {
        self.map
            .get(&category)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, category: ElementCategory) -> &[String] {
        self.map.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, category: ElementCategory) -> bool {
        self.map.get(&category).is_some_and(|values| !values.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementCategory, &[String])> {
        self.map.iter().map(|(category, values)| (*category, values.as_slice()))
    }

    pub fn anime_title(&self) -> Option<&str> {
        self.get(ElementCategory::AnimeTitle).filter(|t| !t.is_empty())
    }

    /// Raw episode string, e.g. "05" or "12".
    pub fn episode_number(&self) -> Option<&str> {
        self.get(ElementCategory::EpisodeNumber)
    }

    /// Episode number parsed from its leading digits.
    pub fn episode(&self) -> Option<u32> {
        self.episode_number().and_then(leading_number)
    }

    pub fn season(&self) -> Option<u32> {
        self.get(ElementCategory::AnimeSeason).and_then(leading_number)
    }

    pub fn episode_title(&self) -> Option<&str> {
        self.get(ElementCategory::EpisodeTitle)
    }

    pub fn release_group(&self) -> Option<&str> {
        self.get(ElementCategory::ReleaseGroup)
    }

    pub fn resolution(&self) -> Option<&str> {
        self.get(ElementCategory::VideoResolution)
    }

    pub fn checksum(&self) -> Option<&str> {
        self.get(ElementCategory::FileChecksum)
    }

    pub fn file_extension(&self) -> Option<&str> {
        self.get(ElementCategory::FileExtension)
    }

    pub fn release_version(&self) -> Option<&str> {
        self.get(ElementCategory::ReleaseVersion)
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
