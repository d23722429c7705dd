use std::sync::LazyLock;

use regex::Regex;

// "(feat. X)", "[ft. X]", "(with X)" credits; catalogs disagree on whether
// these belong in the title
static FEATURING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[\(\[](?:feat\.?|ft\.?|featuring|with)\s+[^\)\]]*[\)\]]")
        .expect("valid featuring regex")
});

// " - Remastered 2011", " - Live", "(Mono)" and similar version markers
static VERSION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+[-–—]\s+.*$|\s*[\(\[][^\)\]]*[\)\]]")
        .expect("valid version suffix regex")
});

pub fn clean_song_name(name: &str) -> String {
    let name = FEATURING.replace_all(name, "");
    name.trim().to_string()
}

/// Spotify's search doesn't support quotes, and `:` starts a field filter.
pub fn clean_quotes(name: &str) -> String {
    let name = name.replace(['\'', '"', '\u{2019}'], "");
    name.replace(':', " ")
}

/// Case-folded, punctuation-stripped, whitespace-collapsed form of `s`.
///
/// Apostrophes vanish ("Don't" and "Dont" agree), any other punctuation
/// separates words ("AC/DC" becomes "ac dc").
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars().flat_map(char::to_lowercase) {
        if matches!(c, '\'' | '\u{2019}' | '`') {
            continue;
        }
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

pub fn normalize_title(title: &str) -> String {
    normalize(&clean_song_name(title))
}

/// Normalized title without any version marker, for fuzzy comparison only.
pub fn base_title(title: &str) -> String {
    let base = VERSION_SUFFIX.replace_all(title, "");
    let base = normalize(&base);
    if base.is_empty() {
        normalize(title)
    } else {
        base
    }
}

/// Similarity in [0, 1] between two already normalized strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    strsim::sorensen_dice(a, b)
}
