mod episode;
mod title;

use std::sync::LazyLock;

use regex::Regex;

use crate::elements::{ElementCategory, Elements};
use crate::keyword;
use crate::tokenizer::{self, Token, TokenCategory};

pub use episode::{EpisodeHit, EpisodeRule, EPISODE_RULES};

/// What a pass found: tokens it claims plus values for the element map.
#[derive(Debug, Default)]
pub(crate) struct PassOutput {
    claimed: Vec<usize>,
    found: Vec<(ElementCategory, String)>,
}

impl PassOutput {
    fn claim(&mut self, index: usize, category: ElementCategory, value: impl Into<String>) {
        self.claimed.push(index);
        self.found.push((category, value.into()));
    }
}

/// A parser pass reads the current tokens and elements and reports what it
/// claims. It never mutates either.
type PassFn = fn(&[Token], &Elements) -> PassOutput;

struct Pass {
    name: &'static str,
    run: PassFn,
}

/// Passes in the order they run. Later passes only see tokens earlier
/// passes left `Unknown`.
const PASSES: &[Pass] = &[
    Pass {
        name: "keywords",
        run: search_keywords,
    },
    Pass {
        name: "isolated_numbers",
        run: search_isolated_numbers,
    },
    Pass {
        name: "episode_number",
        run: episode::search,
    },
    Pass {
        name: "anime_title",
        run: title::search_anime_title,
    },
    Pass {
        name: "release_group",
        run: title::search_release_group,
    },
    Pass {
        name: "episode_title",
        run: title::search_episode_title,
    },
];

/// Parse a release title into its element map.
///
/// Returns `None` when no anime title could be extracted.
///
/// # Example
/// ```
/// let e = tsuzuki_parse::parse("[Erai-raws] Kimetsu no Yaiba - 05 [1080p].mkv").unwrap();
/// assert_eq!(e.anime_title(), Some("Kimetsu no Yaiba"));
/// assert_eq!(e.episode_number(), Some("05"));
/// assert_eq!(e.release_group(), Some("Erai-raws"));
/// assert_eq!(e.resolution(), Some("1080p"));
/// assert_eq!(e.file_extension(), Some("mkv"));
/// ```
pub fn parse(filename: &str) -> Option<Elements> {
    let (base, extension) = strip_extension(filename);

    let mut elements = Elements::default();
    if let Some(extension) = extension {
        elements.insert(ElementCategory::FileExtension, extension);
    }

    let tokens = tokenizer::tokenize(base);
    let (_, elements) = PASSES
        .iter()
        .fold((tokens, elements), |(tokens, elements), pass| {
            run_pass(pass, tokens, elements)
        });

    if elements.anime_title().is_none() {
        tracing::debug!(filename, "No anime title found");
        return None;
    }
    Some(elements)
}

fn run_pass(pass: &Pass, tokens: Vec<Token>, mut elements: Elements) -> (Vec<Token>, Elements) {
    let output = (pass.run)(&tokens, &elements);
    if output.found.is_empty() {
        return (tokens, elements);
    }
    tracing::trace!(pass = pass.name, found = ?output.found, "Parser pass matched");

    let tokens = tokens
        .into_iter()
        .enumerate()
        .map(|(i, token)| {
            if output.claimed.contains(&i) {
                token.identified()
            } else {
                token
            }
        })
        .collect();
    for (category, value) in output.found {
        elements.insert(category, value);
    }
    (tokens, elements)
}

// ── Pass 1: keywords ────────────────────────────────────────────

static RE_RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d{3,4}[pPiI]|\d{3,4}[xX×]\d{3,4})$").unwrap());

static RE_CHECKSUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{8}$").unwrap());

static RE_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[vV]\d{1,2}$").unwrap());

fn search_keywords(tokens: &[Token], _elements: &Elements) -> PassOutput {
    let mut output = PassOutput::default();

    for (i, token) in tokens.iter().enumerate().filter(|(_, t)| t.is_unknown()) {
        let text = token.content.as_str();
        let found = if RE_RESOLUTION.is_match(text) {
            Some((ElementCategory::VideoResolution, text))
        } else if RE_CHECKSUM.is_match(text) {
            Some((ElementCategory::FileChecksum, text))
        } else if RE_VERSION.is_match(text) {
            // "v2" is stored as "2", like versions attached to episodes.
            Some((ElementCategory::ReleaseVersion, &text[1..]))
        } else {
            keyword::lookup(text, token.enclosed).map(|category| (category, text))
        };

        if let Some((category, value)) = found {
            output.claim(i, category, value);
        }
    }

    output
}

// ── Pass 2: isolated numbers ────────────────────────────────────

/// Numbers that fill a bracket pair on their own, like `(2019)` or `[1080]`.
fn search_isolated_numbers(tokens: &[Token], elements: &Elements) -> PassOutput {
    let mut output = PassOutput::default();
    let mut has_year = elements.contains(ElementCategory::AnimeYear);
    let mut has_resolution = elements.contains(ElementCategory::VideoResolution);

    for (i, token) in tokens.iter().enumerate() {
        if !token.is_numeric() || !is_isolated(tokens, i) {
            continue;
        }
        let Ok(number) = token.content.parse::<u32>() else {
            continue;
        };

        if (1900..=2050).contains(&number) {
            if !has_year {
                output.claim(i, ElementCategory::AnimeYear, token.content.as_str());
                has_year = true;
            }
        } else if matches!(number, 480 | 720 | 1080) && !has_resolution {
            output.claim(i, ElementCategory::VideoResolution, token.content.as_str());
            has_resolution = true;
        }
    }

    output
}

/// Bordered only by brackets or the edges of the input.
pub(crate) fn is_isolated(tokens: &[Token], index: usize) -> bool {
    let before = index == 0 || tokens[index - 1].category == TokenCategory::Bracket;
    let after = tokens
        .get(index + 1)
        .is_none_or(|t| t.category == TokenCategory::Bracket);
    before && after
}

// ── Extension ───────────────────────────────────────────────────

const EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "ogm", "wmv", "mpg", "flv", "webm", "m4v", "ts", "mov", "rmvb", "m2ts",
];

/// Strip a known video extension, returning the base name and the lowercase
/// extension.
fn strip_extension(input: &str) -> (&str, Option<String>) {
    let Some((base, ext)) = input.rsplit_once('.') else {
        return (input, None);
    };
    let lower = ext.to_ascii_lowercase();
    if !base.trim().is_empty() && EXTENSIONS.contains(&lower.as_str()) {
        (base, Some(lower))
    } else {
        (input, None)
    }
}
