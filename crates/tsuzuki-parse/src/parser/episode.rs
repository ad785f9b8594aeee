use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{is_isolated, PassOutput};
use crate::elements::{ElementCategory, Elements};
use crate::tokenizer::{Token, TokenCategory};

/// Highest value accepted as an episode number.
const MAX_EPISODE: u32 = 9999;

/// A successful episode extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeHit {
    /// Index of the token holding the episode.
    pub token: usize,
    /// Episode numbers as written; two values for a range.
    pub episodes: Vec<String>,
    /// Season numbers as written; two values for a season range.
    pub seasons: Vec<String>,
    /// Release version digits ("2" for `v2`).
    pub version: Option<String>,
}

/// One named way of finding the episode number.
pub struct EpisodeRule {
    pub name: &'static str,
    find: fn(&[Token]) -> Option<EpisodeHit>,
}

impl EpisodeRule {
    pub fn find(&self, tokens: &[Token]) -> Option<EpisodeHit> {
        (self.find)(tokens)
    }
}

/// Rules in priority order; the first hit wins.
pub static EPISODE_RULES: &[EpisodeRule] = &[
    EpisodeRule {
        name: "season_episode",
        find: find_season_episode,
    },
    EpisodeRule {
        name: "hash_number",
        find: find_hash_number,
    },
    EpisodeRule {
        name: "versioned_number",
        find: find_versioned_number,
    },
    EpisodeRule {
        name: "number_range",
        find: find_number_range,
    },
    EpisodeRule {
        name: "after_dash",
        find: find_after_dash,
    },
    EpisodeRule {
        name: "isolated_number",
        find: find_isolated_number,
    },
];

// ── Regex patterns (compiled once) ──────────────────────────────

/// `S01E17`, `S01E01-E12`, `S01-S02E05`, `2x01`, `S2E05v2`.
static RE_SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^S?(\d{1,2})(?:-S?(\d{1,2}))?(?:x|E)(\d{1,4})(?:-E?(\d{1,4}))?(?:v(\d))?$")
        .unwrap()
});

/// `#05`, `#01-03`, `#05v2`.
static RE_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#(\d{1,4})(?:-(\d{1,4}))?(?:v(\d))?$").unwrap());

/// `05v2`.
static RE_VERSIONED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,4})v(\d)$").unwrap());

/// `01-12`, `01-12v2`, and the merged `1&2` / `1+2` groups.
static RE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,4})[-&+](\d{1,4})(?:v(\d))?$").unwrap());

/// Pass 3: run the rules in order and record the first hit.
pub(super) fn search(tokens: &[Token], elements: &Elements) -> PassOutput {
    let mut output = PassOutput::default();
    if elements.contains(ElementCategory::EpisodeNumber) {
        return output;
    }

    let Some((rule, hit)) = EPISODE_RULES
        .iter()
        .find_map(|rule| rule.find(tokens).map(|hit| (rule, hit)))
    else {
        return output;
    };
    tracing::trace!(rule = rule.name, episodes = ?hit.episodes, "Episode rule matched");

    output.claimed.push(hit.token);
    for season in &hit.seasons {
        output.found.push((ElementCategory::AnimeSeason, season.clone()));
    }
    for episode in &hit.episodes {
        output.found.push((ElementCategory::EpisodeNumber, episode.clone()));
    }
    if let Some(version) = &hit.version {
        output.found.push((ElementCategory::ReleaseVersion, version.clone()));
    }
    if let Some(alt) = alternative_number(tokens, hit.token) {
        output.claim(alt, ElementCategory::EpisodeNumberAlt, tokens[alt].content.as_str());
    }

    output
}

fn unknown_tokens(tokens: &[Token]) -> impl Iterator<Item = (usize, &Token)> {
    tokens.iter().enumerate().filter(|(_, t)| t.is_unknown())
}

fn in_range(s: &str) -> bool {
    s.parse::<u32>().is_ok_and(|n| n <= MAX_EPISODE)
}

fn version(caps: &Captures<'_>, group: usize) -> Option<String> {
    caps.get(group).map(|m| m.as_str().to_string())
}

/// (a) Season and episode in one token.
fn find_season_episode(tokens: &[Token]) -> Option<EpisodeHit> {
    unknown_tokens(tokens).find_map(|(i, token)| {
        let caps = RE_SEASON_EPISODE.captures(&token.content)?;
        let seasons = [caps.get(1), caps.get(2)]
            .into_iter()
            .flatten()
            .map(|m| m.as_str().to_string())
            .collect();
        let episodes = [caps.get(3), caps.get(4)]
            .into_iter()
            .flatten()
            .map(|m| m.as_str().to_string())
            .collect();
        Some(EpisodeHit {
            token: i,
            episodes,
            seasons,
            version: version(&caps, 5),
        })
    })
}

/// (b) `#NN[-NN][vN]`.
fn find_hash_number(tokens: &[Token]) -> Option<EpisodeHit> {
    unknown_tokens(tokens).find_map(|(i, token)| {
        let caps = RE_HASH.captures(&token.content)?;
        let episodes = [caps.get(1), caps.get(2)]
            .into_iter()
            .flatten()
            .map(|m| m.as_str().to_string())
            .collect();
        Some(EpisodeHit {
            token: i,
            episodes,
            seasons: Vec::new(),
            version: version(&caps, 3),
        })
    })
}

/// (c) `NNvN`.
fn find_versioned_number(tokens: &[Token]) -> Option<EpisodeHit> {
    unknown_tokens(tokens).find_map(|(i, token)| {
        let caps = RE_VERSIONED.captures(&token.content)?;
        Some(EpisodeHit {
            token: i,
            episodes: vec![caps[1].to_string()],
            seasons: Vec::new(),
            version: version(&caps, 2),
        })
    })
}

/// (d) `NN-NN[vN]`, only when the lower bound is below the upper bound.
fn find_number_range(tokens: &[Token]) -> Option<EpisodeHit> {
    unknown_tokens(tokens).find_map(|(i, token)| {
        let caps = RE_RANGE.captures(&token.content)?;
        let lower: u32 = caps[1].parse().ok()?;
        let upper: u32 = caps[2].parse().ok()?;
        if lower >= upper {
            return None;
        }
        Some(EpisodeHit {
            token: i,
            episodes: vec![caps[1].to_string(), caps[2].to_string()],
            seasons: Vec::new(),
            version: version(&caps, 3),
        })
    })
}

/// (e) A number right after a free-standing dash, as in `Title - 05`.
fn find_after_dash(tokens: &[Token]) -> Option<EpisodeHit> {
    unknown_tokens(tokens)
        .filter(|(_, t)| t.is_dash() && !t.enclosed)
        .find_map(|(i, _)| {
            let (next, token) = tokens
                .iter()
                .enumerate()
                .skip(i + 1)
                .find(|(_, t)| t.category != TokenCategory::Delimiter)?;
            (token.is_numeric() && in_range(&token.content)).then(|| EpisodeHit {
                token: next,
                episodes: vec![token.content.clone()],
                ..Default::default()
            })
        })
}

/// (f) Any remaining standalone number in `[1, 9999]`.
///
/// Prefers the last free-text number, skipping the first word of the input
/// (titles such as "86" start with one). Falls back to a number filling a
/// bracket pair on its own, as in `[Group][Title][05]`.
fn find_isolated_number(tokens: &[Token]) -> Option<EpisodeHit> {
    let first_word = unknown_tokens(tokens).map(|(i, _)| i).next();
    let accept = |t: &Token| {
        t.is_numeric()
            && t.content
                .parse::<u32>()
                .is_ok_and(|n| (1..=MAX_EPISODE).contains(&n))
    };

    let free = tokens
        .iter()
        .enumerate()
        .rev()
        .find(|&(i, t)| Some(i) != first_word && !t.enclosed && accept(t));
    let enclosed = || {
        tokens
            .iter()
            .enumerate()
            .find(|&(i, t)| t.enclosed && accept(t) && is_isolated(tokens, i))
    };

    free.or_else(enclosed).map(|(i, t)| EpisodeHit {
        token: i,
        episodes: vec![t.content.clone()],
        ..Default::default()
    })
}

/// An alternative number in brackets right after the episode: `01 (13)`.
fn alternative_number(tokens: &[Token], episode: usize) -> Option<usize> {
    let open = tokens
        .iter()
        .enumerate()
        .skip(episode + 1)
        .find(|(_, t)| t.category != TokenCategory::Delimiter)
        .map(|(i, _)| i)?;
    let number = open + 1;
    let is_alt = tokens[open].category == TokenCategory::Bracket
        && tokens.get(number).is_some_and(|t| t.is_numeric() && in_range(&t.content))
        && tokens
            .get(number + 1)
            .is_some_and(|t| t.category == TokenCategory::Bracket);
    is_alt.then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn rule(name: &str) -> &'static EpisodeRule {
        EPISODE_RULES.iter().find(|r| r.name == name).unwrap()
    }

    fn hit(name: &str, input: &str) -> Option<EpisodeHit> {
        rule(name).find(&tokenize(input))
    }

    #[test]
    fn test_rule_order() {
        let names: Vec<_> = EPISODE_RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "season_episode",
                "hash_number",
                "versioned_number",
                "number_range",
                "after_dash",
                "isolated_number"
            ]
        );
    }

    #[test]
    fn test_season_episode() {
        let h = hit("season_episode", "Title S01E17").unwrap();
        assert_eq!(h.seasons, ["01"]);
        assert_eq!(h.episodes, ["17"]);

        let h = hit("season_episode", "Title 2x01").unwrap();
        assert_eq!(h.seasons, ["2"]);
        assert_eq!(h.episodes, ["01"]);

        let h = hit("season_episode", "Title S01E01-E12v2").unwrap();
        assert_eq!(h.episodes, ["01", "12"]);
        assert_eq!(h.version.as_deref(), Some("2"));
    }

    #[test]
    fn test_hash_number() {
        let h = hit("hash_number", "Title #03").unwrap();
        assert_eq!(h.episodes, ["03"]);
        let h = hit("hash_number", "Title #01-03v2").unwrap();
        assert_eq!(h.episodes, ["01", "03"]);
        assert_eq!(h.version.as_deref(), Some("2"));
    }

    #[test]
    fn test_versioned_number() {
        let h = hit("versioned_number", "Title 05v2").unwrap();
        assert_eq!(h.episodes, ["05"]);
        assert_eq!(h.version.as_deref(), Some("2"));
    }

    #[test]
    fn test_range_requires_ascending() {
        let h = hit("number_range", "Title 01-12").unwrap();
        assert_eq!(h.episodes, ["01", "12"]);
        assert!(hit("number_range", "Title 12-01").is_none());
        assert!(hit("number_range", "Title 05-05").is_none());
    }

    #[test]
    fn test_range_from_merged_group() {
        let h = hit("number_range", "Title 1&2").unwrap();
        assert_eq!(h.episodes, ["1", "2"]);
    }

    #[test]
    fn test_after_dash() {
        let h = hit("after_dash", "Title - 05").unwrap();
        assert_eq!(h.episodes, ["05"]);
        assert!(hit("after_dash", "Title - Subtitle").is_none());
    }

    #[test]
    fn test_isolated_number_prefers_last_free_number() {
        let h = hit("isolated_number", "86 Eighty Six 05").unwrap();
        assert_eq!(h.episodes, ["05"]);
        assert!(hit("isolated_number", "86 Eighty Six").is_none());
    }

    #[test]
    fn test_isolated_number_range_limits() {
        assert!(hit("isolated_number", "Title 0").is_none());
        assert!(hit("isolated_number", "Title 10000").is_none());
    }

    #[test]
    fn test_first_hit_wins() {
        let tokens = tokenize("Title S01E02 - 05");
        let mut elements = Elements::default();
        let out = search(&tokens, &elements);
        assert!(out.found.contains(&(ElementCategory::EpisodeNumber, "02".into())));
        assert!(!out.found.contains(&(ElementCategory::EpisodeNumber, "05".into())));

        elements.insert(ElementCategory::EpisodeNumber, "01");
        assert!(search(&tokens, &elements).found.is_empty());
    }

    #[test]
    fn test_alternative_number() {
        let tokens = tokenize("Title - 01 (13)");
        let out = search(&tokens, &Elements::default());
        assert!(out
            .found
            .contains(&(ElementCategory::EpisodeNumberAlt, "13".into())));
    }
}
