//! Title variation keys for duplicate detection.
//!
//! Two titles that differ only in case, width, punctuation, spacing or a
//! leading article produce the same key, so a release recorded as
//! "show title" blocks a later "Show: Title" for the same episode.

use unicode_normalization::UnicodeNormalization;

/// Normalize a title into its variation key.
///
/// Steps applied in order:
/// 1. Unicode NFKC + lowercase
/// 2. Look-alike character transliteration
/// 3. Separator characters (dashes, underscores) become spaces
/// 4. Punctuation erasure
/// 5. Leading article removal
/// 6. Whitespace collapse
pub fn variation_key(title: &str) -> String {
    let s: String = title.nfkc().collect::<String>().to_lowercase();
    let s = transliterate(&s);
    let s: String = s
        .chars()
        .map(|c| if is_separator(c) { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut words: Vec<&str> = s.split_whitespace().collect();
    if words.len() > 1 && ARTICLES.contains(&words[0]) {
        words.remove(0);
    }
    words.join(" ")
}

/// De-duplicated variation keys for a set of titles, first occurrence first.
/// Titles that normalize to nothing are dropped.
pub fn variation_set<'a>(titles: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for title in titles {
        let key = variation_key(title);
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

const ARTICLES: &[&str] = &["the", "a", "an"];

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '_' | '/' | '\u{2010}' | '\u{2013}' | '\u{2014}' | '\u{30FB}')
}

fn transliterate(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '@' => result.push('a'),
            '\u{00D7}' | '\u{2715}' | '\u{2716}' => result.push('x'), // ×, ✕, ✖
            '\u{00E6}' => result.push_str("ae"),
            '\u{0153}' => result.push_str("oe"),
            '\u{00DF}' => result.push_str("ss"),
            '&' => result.push_str(" and "),
            c => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_and_case() {
        assert_eq!(variation_key("Show: Title"), "show title");
        assert_eq!(variation_key("show title"), "show title");
        assert_eq!(variation_key("Steins;Gate"), "steinsgate");
    }

    #[test]
    fn test_fullwidth() {
        assert_eq!(variation_key("ＦＵＬＬＷＩＤＴＨ"), "fullwidth");
    }

    #[test]
    fn test_separators_become_spaces() {
        assert_eq!(variation_key("Kimetsu-no_Yaiba"), "kimetsu no yaiba");
        assert_eq!(variation_key("Title \u{2014} Sub"), "title sub");
    }

    #[test]
    fn test_leading_article() {
        assert_eq!(variation_key("The Apothecary Diaries"), "apothecary diaries");
        // A lone article is a title, not an article.
        assert_eq!(variation_key("A"), "a");
    }

    #[test]
    fn test_transliteration() {
        assert_eq!(variation_key("Hunter\u{00D7}Hunter"), "hunterxhunter");
        assert_eq!(variation_key("Dre@m"), "dream");
        assert_eq!(variation_key("Tom & Jerry"), "tom and jerry");
    }

    #[test]
    fn test_variation_set_dedups() {
        let set = variation_set(["Show: Title", "show title", "", "Other"]);
        assert_eq!(set, ["show title", "other"]);
    }
}
