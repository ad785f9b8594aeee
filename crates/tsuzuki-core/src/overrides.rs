use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::TsuzukiError;
use crate::normalize::variation_key;
use crate::relations::EpisodeRange;

// ── Document shape ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverrideDocument {
    overrides: OverrideSections,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OverrideSections {
    exact_match: HashMap<String, String>,
    pattern_match: Vec<PatternSpec>,
    anilist_specific: HashMap<String, String>,
    group_specific: HashMap<String, HashMap<String, String>>,
    episode_mappings: Vec<MappingSpec>,
    fallback_patterns: Vec<FallbackSpec>,
}

#[derive(Debug, Deserialize)]
struct PatternSpec {
    pattern: String,
    replacement: String,
}

#[derive(Debug, Deserialize)]
struct FallbackSpec {
    pattern: String,
    replacement: String,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Deserialize)]
struct MappingSpec {
    source_title: String,
    /// `[start, end]`, inclusive.
    source_range: [u32; 2],
    dest_title: String,
    dest_start: u32,
}

// ── Compiled rules ──────────────────────────────────────────────

/// A regex title substitution.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub regex: Regex,
    /// Replacement in `regex` crate syntax (`${1}` group references).
    pub replacement: String,
}

impl PatternRule {
    fn compile(pattern: &str, replacement: &str) -> Result<Self, TsuzukiError> {
        let regex = Regex::new(pattern)
            .map_err(|e| TsuzukiError::Override(format!("pattern '{pattern}': {e}")))?;
        Ok(Self {
            regex,
            replacement: convert_backrefs(replacement),
        })
    }

    /// The substituted title, or `None` if the rule leaves it unchanged.
    pub fn apply(&self, title: &str) -> Option<String> {
        if !self.regex.is_match(title) {
            return None;
        }
        let replaced = self.regex.replace(title, self.replacement.as_str());
        (replaced != title).then(|| replaced.into_owned())
    }
}

/// A range-to-range episode renumbering for one show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMapping {
    pub source_title: String,
    pub source_episodes: EpisodeRange,
    pub dest_title: String,
    pub dest_start: u32,
}

impl EpisodeMapping {
    /// Map `episode` of `title`, if this rule covers it.
    pub fn apply(&self, title: &str, episode: u32) -> Option<(String, u32)> {
        if !self.source_episodes.contains(episode)
            || variation_key(&self.source_title) != variation_key(title)
        {
            return None;
        }
        let dest = EpisodeRange::new(self.dest_start, self.dest_start);
        Some((
            self.dest_title.clone(),
            self.source_episodes.map_onto(&dest, episode),
        ))
    }
}

/// One validated override rule set (global or user tier).
#[derive(Debug, Clone, Default)]
pub struct OverrideRules {
    pub exact_match: HashMap<String, String>,
    pub pattern_match: Vec<PatternRule>,
    pub anilist_specific: HashMap<u64, String>,
    pub group_specific: HashMap<String, HashMap<String, String>>,
    pub episode_mappings: Vec<EpisodeMapping>,
    /// Sorted by ascending priority; equal priorities keep document order.
    pub fallback_patterns: Vec<PatternRule>,
}

impl OverrideRules {
    /// Parse and validate a global override document.
    ///
    /// Comments and trailing commas are tolerated. Any invalid part rejects
    /// the whole document.
    pub fn parse(text: &str) -> Result<Self, TsuzukiError> {
        let sections = read_document(text)?;
        Self::compile(sections)
    }

    /// Parse a user override document. Only `exact_match` and
    /// `episode_mappings` are honoured; other sections are dropped.
    pub fn parse_user(text: &str) -> Result<Self, TsuzukiError> {
        let mut sections = read_document(text)?;
        let dropped = [
            ("pattern_match", sections.pattern_match.is_empty()),
            ("anilist_specific", sections.anilist_specific.is_empty()),
            ("group_specific", sections.group_specific.is_empty()),
            ("fallback_patterns", sections.fallback_patterns.is_empty()),
        ];
        for (section, empty) in dropped {
            if !empty {
                warn!(section, "Ignoring section in user overrides");
            }
        }
        sections.pattern_match.clear();
        sections.anilist_specific.clear();
        sections.group_specific.clear();
        sections.fallback_patterns.clear();
        Self::compile(sections)
    }

    fn compile(sections: OverrideSections) -> Result<Self, TsuzukiError> {
        let pattern_match = sections
            .pattern_match
            .iter()
            .map(|p| PatternRule::compile(&p.pattern, &p.replacement))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fallback = sections.fallback_patterns;
        fallback.sort_by_key(|f| f.priority);
        let fallback_patterns = fallback
            .iter()
            .map(|f| PatternRule::compile(&f.pattern, &f.replacement))
            .collect::<Result<Vec<_>, _>>()?;

        let anilist_specific = sections
            .anilist_specific
            .into_iter()
            .map(|(id, title)| {
                id.trim()
                    .parse::<u64>()
                    .map(|id| (id, title))
                    .map_err(|_| TsuzukiError::Override(format!("invalid AniList ID '{id}'")))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        let episode_mappings = sections
            .episode_mappings
            .into_iter()
            .map(|m| {
                let [start, end] = m.source_range;
                if start > end {
                    return Err(TsuzukiError::Override(format!(
                        "descending range {start}-{end} for '{}'",
                        m.source_title
                    )));
                }
                Ok(EpisodeMapping {
                    source_title: m.source_title,
                    source_episodes: EpisodeRange::new(start, end),
                    dest_title: m.dest_title,
                    dest_start: m.dest_start,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            exact_match: sections.exact_match,
            pattern_match,
            anilist_specific,
            group_specific: sections.group_specific,
            episode_mappings,
            fallback_patterns,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.exact_match.is_empty()
            && self.pattern_match.is_empty()
            && self.anilist_specific.is_empty()
            && self.group_specific.is_empty()
            && self.episode_mappings.is_empty()
            && self.fallback_patterns.is_empty()
    }

    /// Total rule count across all sections.
    pub fn len(&self) -> usize {
        self.exact_match.len()
            + self.pattern_match.len()
            + self.anilist_specific.len()
            + self.group_specific.values().map(HashMap::len).sum::<usize>()
            + self.episode_mappings.len()
            + self.fallback_patterns.len()
    }

    /// First pattern rule that changes the title.
    pub fn apply_patterns(&self, title: &str) -> Option<String> {
        self.pattern_match.iter().find_map(|rule| rule.apply(title))
    }

    /// First fallback rule, by priority, that changes the title.
    pub fn apply_fallbacks(&self, title: &str) -> Option<String> {
        self.fallback_patterns.iter().find_map(|rule| rule.apply(title))
    }

    /// First episode mapping covering `(title, episode)`.
    pub fn map_episode(&self, title: &str, episode: u32) -> Option<(String, u32)> {
        self.episode_mappings
            .iter()
            .find_map(|mapping| mapping.apply(title, episode))
    }
}

fn read_document(text: &str) -> Result<OverrideSections, TsuzukiError> {
    let cleaned = strip_jsonc(text);
    let document: OverrideDocument = serde_json::from_str(&cleaned)
        .map_err(|e| TsuzukiError::Override(format!("invalid document: {e}")))?;
    Ok(document.overrides)
}

static RE_BACKREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\(\d+)").unwrap());

/// Turn `\1`-style group references into `${1}`.
fn convert_backrefs(replacement: &str) -> String {
    RE_BACKREF.replace_all(replacement, "$${${1}}").into_owned()
}

/// Remove `//` and `/* */` comments and trailing commas outside strings, so
/// the result is plain JSON.
pub fn strip_jsonc(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut in_string = false;

    while let Some((i, c)) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek().map(|&(_, next)| next)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for (_, next) in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for (_, next) in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            (',', _) => {
                // Trailing comma: only trivia between it and a closer.
                let rest = strip_leading_trivia(&text[i + 1..]);
                if !(rest.starts_with('}') || rest.starts_with(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn strip_leading_trivia(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("//") {
            s = rest.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = rest.split_once("*/").map_or("", |(_, after)| after);
        } else {
            return s;
        }
    }
}
