use tracing::debug;

use crate::sources::RuleSet;

/// What the resolver is asked about: a parsed title and episode.
#[derive(Debug, Clone, Copy)]
pub struct ResolveQuery<'a> {
    pub title: &'a str,
    pub episode: u32,
    pub release_group: Option<&'a str>,
    pub anilist_id: Option<u64>,
}

impl<'a> ResolveQuery<'a> {
    pub fn new(title: &'a str, episode: u32) -> Self {
        Self {
            title,
            episode,
            release_group: None,
            anilist_id: None,
        }
    }
}

/// Title rule that renamed the show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleStage {
    UserExact,
    AnilistSpecific,
    GroupSpecific,
    GlobalExact,
    PatternMatch,
    FallbackPattern,
}

/// Episode rule that renumbered the episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeStage {
    UserMapping,
    GlobalMapping,
    Relation,
}

/// Canonical identity of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub title: String,
    pub episode: u32,
    pub anilist_id: Option<u64>,
    pub title_stage: Option<TitleStage>,
    pub episode_stage: Option<EpisodeStage>,
}

impl Resolution {
    /// Whether any rule changed the parsed identity.
    pub fn override_applied(&self) -> bool {
        self.title_stage.is_some() || self.episode_stage.is_some()
    }
}

/// Maps parsed (title, episode) pairs onto canonical ones.
///
/// Title rules run first, then episode rules on the resulting title. Title
/// stages compose in order unless a user exact match ends them; among
/// episode rules the first applicable one wins. Performs no I/O.
pub struct IdentityResolver<'a> {
    rules: &'a RuleSet,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    pub fn resolve(&self, query: &ResolveQuery<'_>) -> Resolution {
        let (title, title_stage) = match self.resolve_title(query) {
            Some((title, stage)) => (title, Some(stage)),
            None => (query.title.to_string(), None),
        };

        let mut resolution = Resolution {
            title,
            episode: query.episode,
            anilist_id: query.anilist_id,
            title_stage,
            episode_stage: None,
        };
        self.resolve_episode(&mut resolution);

        if resolution.override_applied() {
            debug!(
                from_title = query.title,
                from_episode = query.episode,
                title = %resolution.title,
                episode = resolution.episode,
                title_stage = ?resolution.title_stage,
                episode_stage = ?resolution.episode_stage,
                "Resolved identity"
            );
        }
        resolution
    }

    /// A user exact match is final. Every other stage runs on the title the
    /// previous stages produced; the last stage that applied is reported.
    fn resolve_title(&self, query: &ResolveQuery<'_>) -> Option<(String, TitleStage)> {
        let global = &self.rules.global;

        if let Some(t) = self.rules.user.exact_match.get(query.title) {
            return Some((t.clone(), TitleStage::UserExact));
        }

        let mut title = query.title.to_string();
        let mut stage = None;

        if let Some(t) = query.anilist_id.and_then(|id| global.anilist_specific.get(&id)) {
            title = t.clone();
            stage = Some(TitleStage::AnilistSpecific);
        }
        if let Some(t) = query
            .release_group
            .and_then(|group| global.group_specific.get(group))
            .and_then(|titles| titles.get(&title))
        {
            title = t.clone();
            stage = Some(TitleStage::GroupSpecific);
        }
        if let Some(t) = global.exact_match.get(&title) {
            title = t.clone();
            stage = Some(TitleStage::GlobalExact);
        }
        if let Some(t) = global.apply_patterns(&title) {
            title = t;
            stage = Some(TitleStage::PatternMatch);
        }
        if let Some(t) = global.apply_fallbacks(&title) {
            title = t;
            stage = Some(TitleStage::FallbackPattern);
        }

        stage.map(|stage| (title, stage))
    }

    fn resolve_episode(&self, resolution: &mut Resolution) {
        let title = resolution.title.as_str();
        let episode = resolution.episode;

        if let Some((title, episode)) = self.rules.user.map_episode(title, episode) {
            resolution.title = title;
            resolution.episode = episode;
            resolution.episode_stage = Some(EpisodeStage::UserMapping);
            return;
        }
        if let Some((title, episode)) = self.rules.global.map_episode(title, episode) {
            resolution.title = title;
            resolution.episode = episode;
            resolution.episode_stage = Some(EpisodeStage::GlobalMapping);
            return;
        }

        let relations = &self.rules.relations;
        let redirect = resolution
            .anilist_id
            .and_then(|id| relations.redirect_anilist(id, episode))
            .or_else(|| relations.redirect_title(title, episode));
        if let Some(redirect) = redirect {
            if let Some(dest_title) = redirect.dest_title {
                resolution.title = dest_title;
            }
            resolution.episode = redirect.dest_episode;
            resolution.anilist_id = redirect.dest.anilist.or(resolution.anilist_id);
            resolution.episode_stage = Some(EpisodeStage::Relation);
        }
    }
}
