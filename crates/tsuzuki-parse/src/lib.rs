//! Release-title tokenizer and element parser.
//!
//! Splits a fansub release name into tokens and runs an ordered list of
//! passes over them to extract the anime title, episode number, release
//! group and the rest of the metadata.

pub mod elements;
pub mod keyword;
pub mod parser;
pub mod tokenizer;

pub use elements::{ElementCategory, Elements};
pub use parser::parse;
pub use tokenizer::{tokenize, Token, TokenCategory};
