//! Fixed lookup tables shared by the home and browse assemblers.

/// Providers shown on the home page, in display order. `series_on` in the
/// home response always carries exactly these keys.
pub const PROVIDERS: &[&str] = &["Netflix", "Prime", "Max", "Disney+", "AppleTV", "Paramount"];

/// Case-sensitive substring needles matched against a series' `networks`
/// label column to decide which provider shelf it belongs to.
pub fn provider_needles(provider: &str) -> &'static [&'static str] {
    match provider {
        "Netflix" => &["Netflix"],
        "Prime" => &["Amazon", "Prime Video"],
        "Max" => &["Max", "HBO"],
        "Disney+" => &["Disney+", "Disney"],
        "AppleTV" => &["Apple TV+", "AppleTV+", "Apple TV"],
        "Paramount" => &["Paramount+", "Paramount"],
        _ => &[],
    }
}

/// Home page genre shelves: display label -> genre-name needles. The
/// needles are matched against normalized genre names when the genre-edge
/// tables exist, or as substrings of the `genres` label column otherwise.
pub const HOME_GENRES: &[(&str, &[&str])] = &[
    ("Action", &["Action"]),
    ("Comedy", &["Comedy"]),
    ("Drama", &["Drama"]),
    ("Horror", &["Horror"]),
    ("Romance", &["Romance"]),
    ("Animation", &["Animation"]),
    ("SciFi", &["Science Fiction", "Sci-Fi & Fantasy", "Sci-Fi"]),
];

/// Browse tab name -> (mode, arg). `arg` is the genre needle set key for
/// `mode == "genre"`, otherwise unused.
pub const BROWSE_TABS: &[(&str, &str, &str)] = &[
    ("popular", "popular", ""),
    ("rating", "rating", ""),
    ("recent", "recent", ""),
    ("action", "genre", "Action"),
    ("comedy", "genre", "Comedy"),
    ("drama", "genre", "Drama"),
    ("horror", "genre", "Horror"),
    ("romance", "genre", "Romance"),
    ("animation", "genre", "Animation"),
    ("scifi", "genre", "Science Fiction"),
    ("thriller", "genre", "Thriller"),
    ("mystery", "genre", "Mystery"),
    ("crime", "genre", "Crime"),
    ("family", "genre", "Family"),
    ("fantasy", "genre", "Fantasy"),
    ("documentary", "genre", "Documentary"),
    ("adventure", "genre", "Adventure"),
    ("history", "genre", "History"),
    ("music", "genre", "Music"),
    ("war", "genre", "War"),
    ("western", "genre", "Western"),
];

/// Genre-name needles used when matching the `genres` label column or the
/// normalized genre edge table. `"Science Fiction"` additionally matches the
/// TV-side label variants the Provider uses for the same shelf.
pub fn genre_needles(name: &'static str) -> Vec<&'static str> {
    match name {
        "Science Fiction" => vec!["Science Fiction", "Sci-Fi & Fantasy", "Sci-Fi"],
        _ => HOME_GENRES
            .iter()
            .find(|(label, _)| *label == name)
            .map(|(_, needles)| needles.to_vec())
            .unwrap_or_else(|| vec![name]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_list_is_exact() {
        assert_eq!(
            PROVIDERS,
            &["Netflix", "Prime", "Max", "Disney+", "AppleTV", "Paramount"]
        );
    }

    #[test]
    fn scifi_needles_cover_tv_label_variants() {
        let needles = genre_needles("Science Fiction");
        assert!(needles.contains(&"Sci-Fi & Fantasy"));
        assert!(needles.contains(&"Sci-Fi"));
    }

    #[test]
    fn unknown_provider_has_no_needles() {
        assert!(provider_needles("Hulu").is_empty());
    }
}
