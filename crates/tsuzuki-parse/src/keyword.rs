use bitflags::bitflags;
use phf::phf_map;

use crate::elements::ElementCategory;

bitflags! {
    /// Flags controlling when a keyword matches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeywordFlags: u8 {
        /// Only match inside brackets. Keeps short or common words
        /// ("TV", "SP", "CR") out of titles.
        const AMBIGUOUS = 0b0000_0001;
    }
}

/// A keyword entry: the element it populates plus matching flags.
#[derive(Debug, Clone, Copy)]
pub struct KeywordEntry {
    pub category: ElementCategory,
    pub flags: KeywordFlags,
}

impl KeywordEntry {
    const fn new(category: ElementCategory) -> Self {
        Self {
            category,
            flags: KeywordFlags::empty(),
        }
    }

    const fn ambiguous(category: ElementCategory) -> Self {
        Self {
            category,
            flags: KeywordFlags::AMBIGUOUS,
        }
    }
}

/// Single-token vocabulary. All keys are UPPERCASE.
pub static KEYWORDS: phf::Map<&'static str, KeywordEntry> = phf_map! {
    // ── Video ────────────────────────────────────────────────────
    "H264" => KeywordEntry::new(ElementCategory::VideoTerm),
    "H265" => KeywordEntry::new(ElementCategory::VideoTerm),
    "X264" => KeywordEntry::new(ElementCategory::VideoTerm),
    "X265" => KeywordEntry::new(ElementCategory::VideoTerm),
    "HEVC" => KeywordEntry::new(ElementCategory::VideoTerm),
    "AVC" => KeywordEntry::new(ElementCategory::VideoTerm),
    "AV1" => KeywordEntry::new(ElementCategory::VideoTerm),
    "XVID" => KeywordEntry::new(ElementCategory::VideoTerm),
    "DIVX" => KeywordEntry::new(ElementCategory::VideoTerm),
    "VP9" => KeywordEntry::new(ElementCategory::VideoTerm),
    "10BIT" => KeywordEntry::new(ElementCategory::VideoTerm),
    "10-BIT" => KeywordEntry::new(ElementCategory::VideoTerm),
    "8BIT" => KeywordEntry::new(ElementCategory::VideoTerm),
    "HI10" => KeywordEntry::new(ElementCategory::VideoTerm),
    "HI10P" => KeywordEntry::new(ElementCategory::VideoTerm),
    "HDR" => KeywordEntry::new(ElementCategory::VideoTerm),
    "HDR10" => KeywordEntry::new(ElementCategory::VideoTerm),
    "SDR" => KeywordEntry::ambiguous(ElementCategory::VideoTerm),
    "60FPS" => KeywordEntry::new(ElementCategory::VideoTerm),
    "4K" => KeywordEntry::new(ElementCategory::VideoResolution),

    // ── Audio ────────────────────────────────────────────────────
    "AAC" => KeywordEntry::new(ElementCategory::AudioTerm),
    "AACX2" => KeywordEntry::new(ElementCategory::AudioTerm),
    "AC3" => KeywordEntry::new(ElementCategory::AudioTerm),
    "EAC3" => KeywordEntry::new(ElementCategory::AudioTerm),
    "E-AC-3" => KeywordEntry::new(ElementCategory::AudioTerm),
    "FLAC" => KeywordEntry::new(ElementCategory::AudioTerm),
    "FLACX2" => KeywordEntry::new(ElementCategory::AudioTerm),
    "MP3" => KeywordEntry::new(ElementCategory::AudioTerm),
    "OPUS" => KeywordEntry::new(ElementCategory::AudioTerm),
    "VORBIS" => KeywordEntry::new(ElementCategory::AudioTerm),
    "DTS" => KeywordEntry::new(ElementCategory::AudioTerm),
    "DTS-HD" => KeywordEntry::new(ElementCategory::AudioTerm),
    "TRUEHD" => KeywordEntry::new(ElementCategory::AudioTerm),
    "LPCM" => KeywordEntry::new(ElementCategory::AudioTerm),
    "2CH" => KeywordEntry::new(ElementCategory::AudioTerm),
    "6CH" => KeywordEntry::new(ElementCategory::AudioTerm),
    "DUALAUDIO" => KeywordEntry::new(ElementCategory::AudioTerm),
    "DUAL-AUDIO" => KeywordEntry::new(ElementCategory::AudioTerm),

    // ── Source ───────────────────────────────────────────────────
    "BD" => KeywordEntry::ambiguous(ElementCategory::Source),
    "BDRIP" => KeywordEntry::new(ElementCategory::Source),
    "BDREMUX" => KeywordEntry::new(ElementCategory::Source),
    "BLURAY" => KeywordEntry::new(ElementCategory::Source),
    "BLU-RAY" => KeywordEntry::new(ElementCategory::Source),
    "DVD" => KeywordEntry::new(ElementCategory::Source),
    "DVDRIP" => KeywordEntry::new(ElementCategory::Source),
    "DVD-RIP" => KeywordEntry::new(ElementCategory::Source),
    "HDTV" => KeywordEntry::new(ElementCategory::Source),
    "TVRIP" => KeywordEntry::new(ElementCategory::Source),
    "WEB" => KeywordEntry::ambiguous(ElementCategory::Source),
    "WEBDL" => KeywordEntry::new(ElementCategory::Source),
    "WEB-DL" => KeywordEntry::new(ElementCategory::Source),
    "WEBRIP" => KeywordEntry::new(ElementCategory::Source),
    "WEB-RIP" => KeywordEntry::new(ElementCategory::Source),

    // ── Streaming services ───────────────────────────────────────
    "CR" => KeywordEntry::ambiguous(ElementCategory::StreamingSource),
    "CRUNCHYROLL" => KeywordEntry::ambiguous(ElementCategory::StreamingSource),
    "AMZN" => KeywordEntry::new(ElementCategory::StreamingSource),
    "NF" => KeywordEntry::ambiguous(ElementCategory::StreamingSource),
    "NETFLIX" => KeywordEntry::ambiguous(ElementCategory::StreamingSource),
    "DSNP" => KeywordEntry::new(ElementCategory::StreamingSource),
    "HIDI" => KeywordEntry::ambiguous(ElementCategory::StreamingSource),
    "HIDIVE" => KeywordEntry::ambiguous(ElementCategory::StreamingSource),
    "ADN" => KeywordEntry::ambiguous(ElementCategory::StreamingSource),
    "B-GLOBAL" => KeywordEntry::new(ElementCategory::StreamingSource),

    // ── Languages & subtitles ────────────────────────────────────
    "ENG" => KeywordEntry::ambiguous(ElementCategory::Language),
    "ENGLISH" => KeywordEntry::ambiguous(ElementCategory::Language),
    "JPN" => KeywordEntry::ambiguous(ElementCategory::Language),
    "JAP" => KeywordEntry::ambiguous(ElementCategory::Language),
    "ESPANOL" => KeywordEntry::ambiguous(ElementCategory::Language),
    "VOSTFR" => KeywordEntry::new(ElementCategory::Language),
    "SUB" => KeywordEntry::ambiguous(ElementCategory::Subtitles),
    "SUBS" => KeywordEntry::ambiguous(ElementCategory::Subtitles),
    "SUBBED" => KeywordEntry::new(ElementCategory::Subtitles),
    "DUB" => KeywordEntry::ambiguous(ElementCategory::Subtitles),
    "DUBBED" => KeywordEntry::new(ElementCategory::Subtitles),
    "SOFTSUB" => KeywordEntry::new(ElementCategory::Subtitles),
    "SOFTSUBS" => KeywordEntry::new(ElementCategory::Subtitles),
    "HARDSUB" => KeywordEntry::new(ElementCategory::Subtitles),
    "HARDSUBS" => KeywordEntry::new(ElementCategory::Subtitles),
    "MULTISUB" => KeywordEntry::new(ElementCategory::Subtitles),
    "MULTI-SUB" => KeywordEntry::new(ElementCategory::Subtitles),
    "MULTI-SUBS" => KeywordEntry::new(ElementCategory::Subtitles),

    // ── Release information ──────────────────────────────────────
    "BATCH" => KeywordEntry::new(ElementCategory::ReleaseInformation),
    "COMPLETE" => KeywordEntry::ambiguous(ElementCategory::ReleaseInformation),
    "REMASTER" => KeywordEntry::new(ElementCategory::ReleaseInformation),
    "REMASTERED" => KeywordEntry::new(ElementCategory::ReleaseInformation),
    "UNCENSORED" => KeywordEntry::new(ElementCategory::ReleaseInformation),
    "UNCUT" => KeywordEntry::new(ElementCategory::ReleaseInformation),
    "PREVIEW" => KeywordEntry::ambiguous(ElementCategory::ReleaseInformation),
    "REPACK" => KeywordEntry::new(ElementCategory::ReleaseInformation),

    // ── Anime type ───────────────────────────────────────────────
    "OVA" => KeywordEntry::new(ElementCategory::AnimeType),
    "OAV" => KeywordEntry::new(ElementCategory::AnimeType),
    "OAD" => KeywordEntry::new(ElementCategory::AnimeType),
    "ONA" => KeywordEntry::new(ElementCategory::AnimeType),
    "TV" => KeywordEntry::ambiguous(ElementCategory::AnimeType),
    "SP" => KeywordEntry::ambiguous(ElementCategory::AnimeType),
    "SPECIAL" => KeywordEntry::ambiguous(ElementCategory::AnimeType),
    "SPECIALS" => KeywordEntry::ambiguous(ElementCategory::AnimeType),
    "MOVIE" => KeywordEntry::ambiguous(ElementCategory::AnimeType),
    "NCOP" => KeywordEntry::new(ElementCategory::AnimeType),
    "NCED" => KeywordEntry::new(ElementCategory::AnimeType),
};

/// Look up a single token (case-insensitive). Ambiguous keywords only
/// match when the token is enclosed.
pub fn lookup(text: &str, enclosed: bool) -> Option<ElementCategory> {
    let entry = KEYWORDS.get(text.to_uppercase().as_str())?;
    if entry.flags.contains(KeywordFlags::AMBIGUOUS) && !enclosed {
        return None;
    }
    Some(entry.category)
}
