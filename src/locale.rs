//! Resolves the `(lang, region)` pair used for translation lookups and
//! Provider calls from a request's `lang` query parameter and
//! `Accept-Language` header, in that precedence order.

/// A resolved locale: lowercase language subtag plus an optional uppercase
/// region subtag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    pub lang: String,
    pub region: Option<String>,
}

impl Locale {
    /// The tag passed to Provider calls: `lang` or `lang-region`.
    pub fn tag(&self) -> String {
        match &self.region {
            Some(r) => format!("{}-{}", self.lang, r),
            None => self.lang.clone(),
        }
    }
}

/// Splits a BCP-47-ish tag like `de-DE` or `de_DE` into `(lang, region)`.
fn split_lang(tag: &str) -> Option<(String, Option<String>)> {
    let tag = tag.trim();
    if tag.is_empty() {
        return None;
    }
    let mut parts = tag.splitn(2, |c| c == '-' || c == '_');
    let lang = parts.next()?.trim().to_lowercase();
    if lang.is_empty() {
        return None;
    }
    let region = parts
        .next()
        .map(|r| r.trim().to_uppercase())
        .filter(|r| !r.is_empty());
    Some((lang, region))
}

/// Strips the `;q=...` quality factor from a single `Accept-Language` tag.
fn strip_q_factor(tag: &str) -> &str {
    tag.split(';').next().unwrap_or(tag).trim()
}

/// Picks the first tag out of an `Accept-Language` header value.
fn first_accept_language_tag(header: &str) -> Option<&str> {
    header.split(',').map(strip_q_factor).find(|t| !t.is_empty())
}

/// Resolves a locale from the `lang` query parameter (wins if non-empty)
/// and the raw `Accept-Language` header value, falling back to `en`.
pub fn resolve(lang_query: Option<&str>, accept_language: Option<&str>) -> Locale {
    if let Some(q) = lang_query {
        if let Some((lang, region)) = split_lang(q) {
            return Locale { lang, region };
        }
    }
    if let Some(header) = accept_language {
        if let Some(tag) = first_accept_language_tag(header) {
            if let Some((lang, region)) = split_lang(tag) {
                return Locale { lang, region };
            }
        }
    }
    Locale {
        lang: "en".to_string(),
        region: None,
    }
}
