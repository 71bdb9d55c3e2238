//! Best-effort canonicalization of free-form phone numbers into `+<country><number>`.

/// A single normalization heuristic. Returns `None` when it does not apply.
pub type PhoneRule = fn(&str) -> Option<String>;

/// Rules applied in order to the cleaned number; first match wins.
pub const DEFAULT_RULES: &[PhoneRule] = &[
    already_international,
    pk_trunk_prefixed,
    pk_mobile_bare,
    north_america_ten_digit,
    pk_country_code_without_plus,
];

pub fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect()
}

pub fn normalize(raw: &str) -> String {
    normalize_with(DEFAULT_RULES, raw)
}

pub fn normalize_with(rules: &[PhoneRule], raw: &str) -> String {
    let cleaned = clean(raw);
    for rule in rules {
        if let Some(formatted) = rule(&cleaned) {
            return formatted;
        }
    }
    tracing::warn!("unable to format phone number: {raw}");
    cleaned
}

fn len(s: &str) -> usize {
    s.chars().count()
}

pub fn already_international(s: &str) -> Option<String> {
    s.starts_with('+').then(|| s.to_string())
}

/// `03XXXXXXXXX` -> `+923XXXXXXXXX`
pub fn pk_trunk_prefixed(s: &str) -> Option<String> {
    (s.starts_with("03") && len(s) == 11).then(|| format!("+92{}", &s[1..]))
}

/// `3XXXXXXXXX` -> `+923XXXXXXXXX`
pub fn pk_mobile_bare(s: &str) -> Option<String> {
    (s.starts_with('3') && len(s) == 10).then(|| format!("+92{s}"))
}

pub fn north_america_ten_digit(s: &str) -> Option<String> {
    (len(s) == 10 && !s.starts_with('0')).then(|| format!("+1{s}"))
}

pub fn pk_country_code_without_plus(s: &str) -> Option<String> {
    (s.starts_with("92") && len(s) == 12).then(|| format!("+{s}"))
}
