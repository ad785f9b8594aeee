use serde::Serialize;

/// What a token is, as far as the tokenizer and the parser passes know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCategory {
    /// An opening or closing bracket character.
    Bracket,
    /// A single delimiter character (space, underscore, dot, ...).
    Delimiter,
    /// Text not yet claimed by any parser pass.
    Unknown,
    /// Text claimed by a parser pass.
    Identifier,
    /// A closing bracket with no matching opener.
    Invalid,
}

/// A single token from a release title.
///
/// Concatenating `content` over all tokens reproduces the tokenized input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub category: TokenCategory,
    pub content: String,
    /// Whether the token's characters sit inside a bracket pair.
    /// Bracket tokens themselves count as enclosed.
    pub enclosed: bool,
}

impl Token {
    fn new(category: TokenCategory, content: impl Into<String>, enclosed: bool) -> Self {
        Self {
            category,
            content: content.into(),
            enclosed,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.category == TokenCategory::Unknown
    }

    /// Unknown token made only of ASCII digits.
    pub fn is_numeric(&self) -> bool {
        self.is_unknown()
            && !self.content.is_empty()
            && self.content.chars().all(|c| c.is_ascii_digit())
    }

    /// Unknown token made only of dash-class characters.
    pub fn is_dash(&self) -> bool {
        self.is_unknown() && !self.content.is_empty() && self.content.chars().all(is_dash)
    }

    /// The same token, reclassified as claimed.
    pub(crate) fn identified(self) -> Self {
        Self {
            category: TokenCategory::Identifier,
            ..self
        }
    }
}

/// Delimiters used when none are configured.
pub const DEFAULT_DELIMITERS: &[char] = &[' ', '_', '.', '&', '+', ',', '|'];

const BRACKETS: &[(char, char)] = &[('(', ')'), ('[', ']'), ('{', '}')];

/// Hyphen-minus, hyphen, en-dash, em-dash.
pub fn is_dash(c: char) -> bool {
    matches!(c, '-' | '\u{2010}' | '\u{2013}' | '\u{2014}')
}

fn closing_for(c: char) -> Option<char> {
    BRACKETS
        .iter()
        .find(|(open, _)| *open == c)
        .map(|(_, close)| *close)
}

fn is_closing(c: char) -> bool {
    BRACKETS.iter().any(|(_, close)| *close == c)
}

/// Tokenizer configuration.
#[derive(Debug, Clone)]
pub struct TokenizerOptions {
    pub delimiters: Vec<char>,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            delimiters: DEFAULT_DELIMITERS.to_vec(),
        }
    }
}

/// Tokenize a release title with the default delimiter set.
pub fn tokenize(input: &str) -> Vec<Token> {
    tokenize_with(input, &TokenizerOptions::default())
}

/// Tokenize a release title.
///
/// Handles:
/// - Nested `()`, `[]` and `{}` pairs; an opener without a closer encloses
///   the rest of the input
/// - Delimiter-separated free text, one `Delimiter` token per character
/// - `1&2` / `1+2` numeric groups, kept as one `Unknown` token
///
/// Empty or whitespace-only input yields no tokens.
pub fn tokenize_with(input: &str, options: &TokenizerOptions) -> Vec<Token> {
    if input.trim().is_empty() {
        return Vec::new();
    }

    let mut tokens = Vec::new();
    let mut closers: Vec<char> = Vec::new();
    let mut text = String::new();

    for c in input.chars() {
        if let Some(close) = closing_for(c) {
            flush_text(&mut tokens, &mut text, !closers.is_empty(), options);
            tokens.push(Token::new(TokenCategory::Bracket, c, true));
            closers.push(close);
        } else if closers.last() == Some(&c) {
            flush_text(&mut tokens, &mut text, true, options);
            tokens.push(Token::new(TokenCategory::Bracket, c, true));
            closers.pop();
        } else if closers.is_empty() && is_closing(c) {
            flush_text(&mut tokens, &mut text, false, options);
            tokens.push(Token::new(TokenCategory::Invalid, c, false));
        } else {
            text.push(c);
        }
    }
    flush_text(&mut tokens, &mut text, !closers.is_empty(), options);

    merge_numeric_groups(tokens)
}

/// Split buffered text into `Unknown` and `Delimiter` tokens.
fn flush_text(tokens: &mut Vec<Token>, text: &mut String, enclosed: bool, options: &TokenizerOptions) {
    let mut word = String::new();
    for c in text.drain(..) {
        if options.delimiters.contains(&c) {
            if !word.is_empty() {
                tokens.push(Token::new(
                    TokenCategory::Unknown,
                    std::mem::take(&mut word),
                    enclosed,
                ));
            }
            tokens.push(Token::new(TokenCategory::Delimiter, c, enclosed));
        } else {
            word.push(c);
        }
    }
    if !word.is_empty() {
        tokens.push(Token::new(TokenCategory::Unknown, word, enclosed));
    }
}

/// Digits joined by `&`/`+`, starting and ending with a digit.
fn is_numeric_group(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit())
        && s.ends_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_digit() || c == '&' || c == '+')
}

/// Fold `&`/`+` delimiters sitting between numeric tokens into the left token.
fn merge_numeric_groups(tokens: Vec<Token>) -> Vec<Token> {
    let mut merged: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        let joinable = token.category == TokenCategory::Delimiter
            && matches!(token.content.as_str(), "&" | "+")
            && merged
                .last()
                .zip(iter.peek())
                .is_some_and(|(left, right)| {
                    left.is_unknown()
                        && is_numeric_group(&left.content)
                        && right.is_numeric()
                        && left.enclosed == right.enclosed
                });

        if joinable {
            if let (Some(left), Some(right)) = (merged.last_mut(), iter.next()) {
                left.content.push_str(&token.content);
                left.content.push_str(&right.content);
            }
            continue;
        }
        merged.push(token);
    }

    merged
}
