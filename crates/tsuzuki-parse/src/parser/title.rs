use super::PassOutput;
use crate::elements::{ElementCategory, Elements};
use crate::tokenizer::{is_dash, Token, TokenCategory};

/// Indices of a maximal stretch of `Unknown` and `Delimiter` tokens that
/// share one enclosure state. Leading and trailing delimiters are dropped.
type Run = Vec<usize>;

fn runs(tokens: &[Token], enclosed: bool) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current = Run::new();

    for (i, token) in tokens.iter().enumerate() {
        let continues = token.enclosed == enclosed
            && matches!(
                token.category,
                TokenCategory::Unknown | TokenCategory::Delimiter
            );
        if continues {
            current.push(i);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs.into_iter()
        .filter_map(|run| trim_delimiters(tokens, run))
        .collect()
}

fn trim_delimiters(tokens: &[Token], run: Run) -> Option<Run> {
    let first = run.iter().position(|&i| tokens[i].is_unknown())?;
    let last = run.iter().rposition(|&i| tokens[i].is_unknown())?;
    Some(run[first..=last].to_vec())
}

/// Title text for a run: delimiters become spaces, except `,` and `&`.
fn render(tokens: &[Token], run: &[usize]) -> String {
    let mut text = String::new();
    for &i in run {
        let token = &tokens[i];
        match token.category {
            TokenCategory::Delimiter if matches!(token.content.as_str(), "," | "&") => {
                text.push_str(&token.content)
            }
            TokenCategory::Delimiter => text.push(' '),
            _ => text.push_str(&token.content),
        }
    }
    text.split(' ')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ' ' || is_dash(c))
        .to_string()
}

/// Claim the run's `Unknown` tokens under one element value.
fn claim_run(tokens: &[Token], run: &[usize], category: ElementCategory, value: String) -> PassOutput {
    let mut output = PassOutput::default();
    output
        .claimed
        .extend(run.iter().copied().filter(|&i| tokens[i].is_unknown()));
    output.found.push((category, value));
    output
}

/// First free-text run; falls back to the first text inside the second
/// top-level bracket group (`[Group][Title][05]`).
pub(super) fn search_anime_title(tokens: &[Token], elements: &Elements) -> PassOutput {
    if elements.contains(ElementCategory::AnimeTitle) {
        return PassOutput::default();
    }

    let free = runs(tokens, false).into_iter().find_map(|run| {
        let title = render(tokens, &run);
        (!title.is_empty()).then_some((run, title))
    });
    let found = free.or_else(|| {
        let run = second_bracket_run(tokens)?;
        let title = render(tokens, &run);
        (!title.is_empty()).then_some((run, title))
    });

    match found {
        Some((run, title)) => claim_run(tokens, &run, ElementCategory::AnimeTitle, title),
        None => PassOutput::default(),
    }
}

fn second_bracket_run(tokens: &[Token]) -> Option<Run> {
    let mut depth = 0usize;
    let mut groups = 0usize;
    let mut inside = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if token.category == TokenCategory::Bracket {
            if matches!(token.content.as_str(), "(" | "[" | "{") {
                if depth == 0 {
                    groups += 1;
                }
                depth += 1;
            } else {
                depth = depth.saturating_sub(1);
                if depth == 0 && groups == 2 {
                    break;
                }
            }
            continue;
        }
        if depth > 0 && groups == 2 {
            inside.push(i);
        }
    }

    // First unclaimed stretch inside the group.
    let start = inside.iter().position(|&i| tokens[i].is_unknown())?;
    let run: Run = inside[start..]
        .iter()
        .copied()
        .take_while(|&i| {
            matches!(
                tokens[i].category,
                TokenCategory::Unknown | TokenCategory::Delimiter
            )
        })
        .collect();
    trim_delimiters(tokens, run)
}

/// First enclosed run longer than one character, taken verbatim.
pub(super) fn search_release_group(tokens: &[Token], elements: &Elements) -> PassOutput {
    if elements.contains(ElementCategory::ReleaseGroup) {
        return PassOutput::default();
    }

    let group = runs(tokens, true).into_iter().find_map(|run| {
        let text: String = run.iter().map(|&i| tokens[i].content.as_str()).collect();
        let text = text.trim().to_string();
        (text.chars().count() > 1).then_some((run, text))
    });

    match group {
        Some((run, text)) => claim_run(tokens, &run, ElementCategory::ReleaseGroup, text),
        None => PassOutput::default(),
    }
}

/// First free-text run left after the episode number.
pub(super) fn search_episode_title(tokens: &[Token], elements: &Elements) -> PassOutput {
    if !elements.contains(ElementCategory::EpisodeNumber)
        || elements.contains(ElementCategory::EpisodeTitle)
    {
        return PassOutput::default();
    }

    let found = runs(tokens, false).into_iter().find_map(|run| {
        let title = render(tokens, &run);
        (!title.is_empty()).then_some((run, title))
    });

    match found {
        Some((run, title)) => claim_run(tokens, &run, ElementCategory::EpisodeTitle, title),
        None => PassOutput::default(),
    }
}
