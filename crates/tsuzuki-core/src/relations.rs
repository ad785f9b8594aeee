use std::collections::HashMap;

use tracing::warn;

use crate::error::TsuzukiError;
use crate::normalize::variation_key;

/// End value for open-ended ranges such as `14-?`.
pub const OPEN_END: u32 = 9999;

/// An episode range (inclusive on both ends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRange {
    pub start: u32,
    pub end: u32,
}

impl EpisodeRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, episode: u32) -> bool {
        episode >= self.start && episode <= self.end
    }

    /// Map `episode` from this range onto `dest` by linear offset.
    pub fn map_onto(&self, dest: &EpisodeRange, episode: u32) -> u32 {
        dest.start + (episode - self.start)
    }
}

/// MAL, Kitsu and AniList IDs of one side of a rule. Unknown IDs are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationIds {
    pub mal: Option<u64>,
    pub kitsu: Option<u64>,
    pub anilist: Option<u64>,
}

/// A single relation rule mapping source episodes to destination episodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRule {
    pub source: RelationIds,
    pub source_episodes: EpisodeRange,
    pub dest: RelationIds,
    pub dest_episodes: EpisodeRange,
    /// Display titles from the preceding `#` annotation, if any.
    pub source_title: Option<String>,
    pub dest_title: Option<String>,
}

impl RelationRule {
    fn redirect(&self, episode: u32) -> EpisodeRedirect {
        EpisodeRedirect {
            dest: self.dest,
            dest_episode: self.source_episodes.map_onto(&self.dest_episodes, episode),
            dest_title: self.dest_title.clone(),
        }
    }
}

/// Result of an episode redirect lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRedirect {
    pub dest: RelationIds,
    pub dest_episode: u32,
    pub dest_title: Option<String>,
}

/// `::meta` section values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationMeta {
    pub version: Option<String>,
    pub last_modified: Option<String>,
}

/// Database of anime episode relation rules.
#[derive(Debug, Clone, Default)]
pub struct RelationDatabase {
    rules: Vec<RelationRule>,
    /// Rule indices by source AniList ID.
    by_anilist: HashMap<u64, Vec<usize>>,
    meta: RelationMeta,
    skipped: usize,
}

/// Display titles announced by a `#` comment for the rules that follow.
#[derive(Debug, Clone)]
enum Annotation {
    /// `# Source -> Dest`
    Fixed { source: String, dest: String },
    /// `# Source -> ~ S2, S3`: successive rules take successive suffixes;
    /// the last suffix repeats.
    Suffixed {
        source: String,
        suffixes: Vec<String>,
        used: usize,
    },
}

impl Annotation {
    fn parse(comment: &str) -> Option<Self> {
        let (source, dest) = comment.split_once("->")?;
        let source = source.trim().to_string();
        let dest = dest.trim();
        if source.is_empty() || dest.is_empty() {
            return None;
        }

        match dest.strip_prefix('~') {
            Some(suffixes) => {
                let suffixes: Vec<String> = suffixes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if suffixes.is_empty() {
                    return None;
                }
                Some(Self::Suffixed {
                    source,
                    suffixes,
                    used: 0,
                })
            }
            None => Some(Self::Fixed {
                source,
                dest: dest.to_string(),
            }),
        }
    }

    /// Titles for the next rule.
    fn next_titles(&mut self) -> (String, String) {
        match self {
            Self::Fixed { source, dest } => (source.clone(), dest.clone()),
            Self::Suffixed {
                source,
                suffixes,
                used,
            } => {
                let suffix = &suffixes[(*used).min(suffixes.len() - 1)];
                *used += 1;
                (source.clone(), format!("{source} {suffix}"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Meta,
    Rules,
}

impl RelationDatabase {
    /// Parse anime-relations.txt format into a database.
    ///
    /// Malformed rule lines are skipped with a warning. A document without a
    /// `::rules` section is rejected as a whole.
    pub fn parse(data: &str) -> Result<Self, TsuzukiError> {
        let mut db = Self::default();
        let mut section = Section::None;
        let mut saw_rules = false;
        let mut annotation: Option<Annotation> = None;

        for (number, line) in data.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() {
                annotation = None;
                continue;
            }
            if let Some(name) = line.strip_prefix("::") {
                section = match name.trim() {
                    "meta" => Section::Meta,
                    "rules" => {
                        saw_rules = true;
                        Section::Rules
                    }
                    _ => Section::None,
                };
                annotation = None;
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                if let Some(parsed) = Annotation::parse(comment) {
                    annotation = Some(parsed);
                }
                continue;
            }

            let Some(body) = line.strip_prefix('-') else {
                continue;
            };
            let body = body.trim();

            match section {
                Section::Meta => db.parse_meta(body),
                Section::Rules => {
                    let titles = annotation.as_mut().map(Annotation::next_titles);
                    match parse_rule_line(body, titles) {
                        Ok(rules) => rules.into_iter().for_each(|rule| db.push(rule)),
                        Err(e) => {
                            warn!(line = number + 1, error = %e, "Skipping relation rule");
                            db.skipped += 1;
                        }
                    }
                }
                Section::None => {}
            }
        }

        if !saw_rules {
            return Err(TsuzukiError::Relation("missing ::rules section".into()));
        }
        Ok(db)
    }

    fn parse_meta(&mut self, body: &str) {
        let Some((key, value)) = body.split_once(':') else {
            return;
        };
        let value = Some(value.trim().to_string());
        match key.trim() {
            "version" => self.meta.version = value,
            "last_modified" => self.meta.last_modified = value,
            _ => {}
        }
    }

    fn push(&mut self, rule: RelationRule) {
        let index = self.rules.len();
        if let Some(id) = rule.source.anilist {
            self.by_anilist.entry(id).or_default().push(index);
        }
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[RelationRule] {
        &self.rules
    }

    pub fn meta(&self) -> &RelationMeta {
        &self.meta
    }

    /// Number of rule lines skipped as malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Look up an episode redirect by AniList ID and episode number.
    pub fn redirect_anilist(&self, anilist_id: u64, episode: u32) -> Option<EpisodeRedirect> {
        self.by_anilist
            .get(&anilist_id)?
            .iter()
            .map(|&i| &self.rules[i])
            .find(|rule| rule.source_episodes.contains(episode))
            .map(|rule| rule.redirect(episode))
    }

    /// Look up an episode redirect by show title.
    ///
    /// A rule applies when the title matches its source title, or failing
    /// that its destination title, and the episode falls in the source
    /// range. Titles compare by variation key.
    pub fn redirect_title(&self, title: &str, episode: u32) -> Option<EpisodeRedirect> {
        let key = variation_key(title);
        if key.is_empty() {
            return None;
        }
        let title_matches =
            |t: &Option<String>| t.as_deref().is_some_and(|t| variation_key(t) == key);

        let in_range = |rule: &&RelationRule| rule.source_episodes.contains(episode);
        self.rules
            .iter()
            .filter(in_range)
            .find(|rule| title_matches(&rule.source_title))
            .or_else(|| {
                self.rules
                    .iter()
                    .filter(in_range)
                    .find(|rule| title_matches(&rule.dest_title))
            })
            .map(|rule| rule.redirect(episode))
    }

    /// Whether any rule covers `episode` of the AniList entry, on either side.
    pub fn has_rule_for(&self, anilist_id: u64, episode: u32) -> bool {
        self.rules.iter().any(|rule| {
            (rule.source.anilist == Some(anilist_id) && rule.source_episodes.contains(episode))
                || (rule.dest.anilist == Some(anilist_id) && rule.dest_episodes.contains(episode))
        })
    }
}

/// Parse a single rule line into one or two rules.
///
/// Format: `mal|kitsu|anilist:episodes -> mal|kitsu|anilist:episodes[!]`.
/// A trailing `!` also redirects the destination's own continuous numbering:
/// destination IDs over the source range map onto the destination range.
fn parse_rule_line(
    line: &str,
    titles: Option<(String, String)>,
) -> Result<Vec<RelationRule>, TsuzukiError> {
    let err = |msg: &str| TsuzukiError::Relation(format!("{msg}: {line}"));

    let (line, bidirectional) = match line.strip_suffix('!') {
        Some(stripped) => (stripped.trim_end(), true),
        None => (line, false),
    };

    let (source, dest) = line.split_once("->").ok_or_else(|| err("missing '->'"))?;
    let (source_ids, source_episodes) = parse_side(source, None).map_err(|e| err(&e))?;
    let (dest_ids, dest_episodes) = parse_side(dest, Some(&source_ids)).map_err(|e| err(&e))?;

    if source_episodes.start > source_episodes.end || dest_episodes.start > dest_episodes.end {
        return Err(err("descending range"));
    }

    let (source_title, dest_title) = match titles {
        Some((source, dest)) => (Some(source), Some(dest)),
        None => (None, None),
    };

    let mut rules = vec![RelationRule {
        source: source_ids,
        source_episodes,
        dest: dest_ids,
        dest_episodes,
        source_title,
        dest_title: dest_title.clone(),
    }];

    if bidirectional {
        rules.push(RelationRule {
            source: dest_ids,
            source_episodes,
            dest: dest_ids,
            dest_episodes,
            source_title: dest_title.clone(),
            dest_title,
        });
    }

    Ok(rules)
}

/// Parse one side of a rule: `mal|kitsu|anilist:episodes`. `~` IDs copy
/// the matching source ID.
fn parse_side(
    s: &str,
    source: Option<&RelationIds>,
) -> Result<(RelationIds, EpisodeRange), String> {
    let s = s.trim();
    let (ids_part, eps_part) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("missing ':' in '{s}'"))?;

    let parts: Vec<&str> = ids_part.split('|').map(str::trim).collect();
    let [mal, kitsu, anilist] = parts.as_slice() else {
        return Err(format!(
            "expected 3 pipe-separated IDs, got {}: '{ids_part}'",
            parts.len()
        ));
    };

    let source = source.copied();
    let ids = RelationIds {
        mal: parse_id(mal, source.and_then(|s| s.mal))?,
        kitsu: parse_id(kitsu, source.and_then(|s| s.kitsu))?,
        anilist: parse_id(anilist, source.and_then(|s| s.anilist))?,
    };
    let episodes = parse_episode_range(eps_part)?;
    Ok((ids, episodes))
}

fn parse_id(part: &str, tilde: Option<u64>) -> Result<Option<u64>, String> {
    match part {
        "?" => Ok(None),
        "~" => Ok(tilde),
        _ => part
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("invalid ID '{part}'")),
    }
}

/// Parse an episode range like "1-12", single episode "13", or open-ended
/// "14-?".
fn parse_episode_range(s: &str) -> Result<EpisodeRange, String> {
    let s = s.trim();
    let number = |n: &str| {
        n.trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid episode number '{n}' in '{s}'"))
    };

    match s.split_once('-') {
        Some((start, "?")) => Ok(EpisodeRange::new(number(start)?, OPEN_END)),
        Some((start, end)) => Ok(EpisodeRange::new(number(start)?, number(end)?)),
        None => {
            let episode = number(s)?;
            Ok(EpisodeRange::new(episode, episode))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(rules: &str) -> RelationDatabase {
        RelationDatabase::parse(&format!("::rules\n{rules}")).unwrap()
    }

    #[test]
    fn test_parse_simple_rule() {
        let rules = parse_rule_line("41380|43367|116242:13-24 -> 44881|43883|127366:1-12", None)
            .unwrap();
        assert_eq!(rules.len(), 1);
        let r = &rules[0];
        assert_eq!(r.source.mal, Some(41380));
        assert_eq!(r.source.kitsu, Some(43367));
        assert_eq!(r.source.anilist, Some(116242));
        assert_eq!(r.source_episodes, EpisodeRange::new(13, 24));
        assert_eq!(r.dest.anilist, Some(127366));
        assert_eq!(r.dest_episodes, EpisodeRange::new(1, 12));
    }

    #[test]
    fn test_tilde_and_unknown_ids() {
        let rules = parse_rule_line("10001|?|10003:13 -> ~|~|~:1", None).unwrap();
        assert_eq!(rules[0].dest.mal, Some(10001));
        assert_eq!(rules[0].dest.kitsu, None);
        assert_eq!(rules[0].dest.anilist, Some(10003));
    }

    #[test]
    fn test_open_ended_range() {
        let rules = parse_rule_line("1|2|3:14-? -> 4|5|6:1-?", None).unwrap();
        assert_eq!(rules[0].source_episodes, EpisodeRange::new(14, OPEN_END));
    }

    #[test]
    fn test_bidirectional_adds_self_redirect() {
        let db = db("- 1|2|3:13-24 -> 4|5|6:1-12!");
        assert_eq!(db.rules().len(), 2);
        // Destination's continuous numbering maps onto itself.
        let redirect = db.redirect_anilist(6, 14).unwrap();
        assert_eq!(redirect.dest.anilist, Some(6));
        assert_eq!(redirect.dest_episode, 2);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let db = db("- garbage\n- 1|2:1 -> 3|4|5:1\n- 1|2|3:5-1 -> 4|5|6:1\n- 1|2|3:1 -> 4|5|6:1");
        assert_eq!(db.rules().len(), 1);
        assert_eq!(db.skipped(), 3);
    }

    #[test]
    fn test_missing_rules_section_rejected() {
        assert!(RelationDatabase::parse("<html>not found</html>").is_err());
    }

    #[test]
    fn test_meta_section() {
        let db = RelationDatabase::parse(
            "::meta\n- version: 1.3.0\n- last_modified: 2024-01-01\n\n::rules\n",
        )
        .unwrap();
        assert_eq!(db.meta().version.as_deref(), Some("1.3.0"));
        assert_eq!(db.meta().last_modified.as_deref(), Some("2024-01-01"));
        assert!(db.is_empty());
    }

    #[test]
    fn test_redirect_lookup() {
        let db = db("- 41380|43367|116242:13-24 -> 44881|43883|127366:1-12");
        let redirect = db.redirect_anilist(116242, 13).unwrap();
        assert_eq!(redirect.dest.anilist, Some(127366));
        assert_eq!(redirect.dest_episode, 1);
        assert_eq!(db.redirect_anilist(116242, 24).unwrap().dest_episode, 12);
        assert!(db.redirect_anilist(116242, 12).is_none());
        assert!(db.redirect_anilist(99999, 13).is_none());
    }

    #[test]
    fn test_range_linearity() {
        let db = db("- 1|2|3:5-20 -> 4|5|6:101-116");
        for k in 0..=15 {
            assert_eq!(db.redirect_anilist(3, 5 + k).unwrap().dest_episode, 101 + k);
        }
    }

    #[test]
    fn test_split_season_scenario() {
        let db = db(
            "# Show -> Show A\n- 1|1|1:1-12 -> 2|2|2:1-12\n\n\
             # Show -> Show B\n- 1|1|1:13-24 -> 3|3|3:1-12",
        );
        let redirect = db.redirect_anilist(1, 14).unwrap();
        assert_eq!(redirect.dest.anilist, Some(3));
        assert_eq!(redirect.dest_episode, 2);

        let redirect = db.redirect_title("Show", 14).unwrap();
        assert_eq!(redirect.dest_title.as_deref(), Some("Show B"));
        assert_eq!(redirect.dest_episode, 2);
    }

    #[test]
    fn test_suffix_annotation() {
        let db = db(
            "# Title -> ~ S2, S3\n- 1|1|1:13-24 -> 2|2|2:1-12\n- 1|1|1:25-36 -> 3|3|3:1-12\n\
             - 1|1|1:37-48 -> 4|4|4:1-12",
        );
        let titles: Vec<_> = db.rules().iter().map(|r| r.dest_title.as_deref()).collect();
        assert_eq!(
            titles,
            [Some("Title S2"), Some("Title S3"), Some("Title S3")]
        );
    }

    #[test]
    fn test_blank_line_resets_annotation() {
        let db = db("# Title -> Other\n\n- 1|1|1:13 -> 2|2|2:1");
        assert_eq!(db.rules()[0].dest_title, None);
    }

    #[test]
    fn test_redirect_by_destination_title() {
        let db = db("# Show -> Show 2nd Season\n- 1|1|1:13-24 -> 2|2|2:1-12");
        let redirect = db.redirect_title("Show 2nd Season", 15).unwrap();
        assert_eq!(redirect.dest_episode, 3);
        assert!(db.redirect_title("Unrelated", 15).is_none());
    }

    #[test]
    fn test_has_rule_for() {
        let db = db("- 1|1|10:13-24 -> 2|2|20:1-12");
        assert!(db.has_rule_for(10, 13));
        assert!(db.has_rule_for(20, 12));
        assert!(!db.has_rule_for(10, 1));
        assert!(!db.has_rule_for(30, 13));
    }
}
