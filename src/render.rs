use crate::types::Recipient;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `[key]`, shortest match, never across a newline.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]").expect("placeholder pattern is valid"));

/// Replaces every `[key]` token with the recipient's lower-cased attribute.
///
/// Unknown keys and absent attributes collapse to the empty string. A `[` with
/// no closing `]` on the same line is kept as-is.
pub fn render(template: &str, recipient: &Recipient) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            recipient
                .attribute(&caps[1])
                .map(str::to_lowercase)
                .unwrap_or_default()
        })
        .into_owned()
}
