//! Search strategies and the query variants they expand into.

use crate::config::CollectionSettings;
use crate::models::{Genre, SearchStrategy};

/// Sub-genre search terms for each bucket. The bucket name itself is always
/// queried last, so it is not repeated here.
pub fn genre_terms(genre: Genre) -> &'static [&'static str] {
    match genre {
        Genre::Pop => &[
            "dance-pop",
            "synth-pop",
            "electropop",
            "indie-pop",
            "teen-pop",
            "art-pop",
            "dream-pop",
            "britpop",
            "k-pop",
            "j-pop",
        ],
        Genre::Rock => &[
            "alternative-rock",
            "indie-rock",
            "classic-rock",
            "hard-rock",
            "post-rock",
            "progressive-rock",
            "psychedelic-rock",
            "garage-rock",
            "punk-rock",
            "folk-rock",
        ],
        Genre::HipHop => &[
            "rap",
            "trap",
            "old-school-hip-hop",
            "east-coast-hip-hop",
            "west-coast-hip-hop",
            "southern-hip-hop",
            "conscious-hip-hop",
            "gangsta-rap",
        ],
        Genre::Electronic => &[
            "techno",
            "house",
            "deep-house",
            "tech-house",
            "progressive-house",
            "electro-house",
            "trance",
            "dubstep",
            "drum-and-bass",
        ],
        Genre::Jazz => &[
            "smooth-jazz",
            "jazz-fusion",
            "contemporary-jazz",
            "bebop",
            "hard-bop",
            "cool-jazz",
            "free-jazz",
            "latin-jazz",
            "swing",
        ],
        Genre::Classical => &[
            "baroque",
            "romantic",
            "contemporary-classical",
            "classical-piano",
            "chamber-music",
            "orchestral",
            "opera",
        ],
        Genre::Metal => &[
            "heavy-metal",
            "death-metal",
            "black-metal",
            "thrash-metal",
            "power-metal",
            "progressive-metal",
            "doom-metal",
            "metalcore",
        ],
        Genre::RnB => &[
            "rnb",
            "contemporary-r&b",
            "neo-soul",
            "alternative-r&b",
            "soul",
            "funk",
            "gospel",
        ],
    }
}

/// One strategy per configured genre, in collection order.
pub fn build_strategies(settings: &CollectionSettings) -> Vec<SearchStrategy> {
    settings
        .genres
        .iter()
        .map(|genre| SearchStrategy {
            genre: *genre,
            year_range: settings.year_range,
            query_template: settings.query_template.clone(),
            terms: genre_terms(*genre).iter().map(|t| t.to_string()).collect(),
        })
        .collect()
}

/// A concrete query issued during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryVariant {
    pub query: String,
    /// Release year hits must match. `None` when the template has no year
    /// placeholder, in which case the whole year range is accepted.
    pub year: Option<i32>,
}

/// Expand a strategy into its ordered query variants.
///
/// For every year (newest first) every term is queried, then the bucket name.
pub fn query_variants(strategy: &SearchStrategy) -> Vec<QueryVariant> {
    let mut terms: Vec<&str> = strategy.terms.iter().map(String::as_str).collect();
    let bucket = strategy.genre.as_str();
    if !terms.contains(&bucket) {
        terms.push(bucket);
    }

    let render = |term: &str, year: Option<i32>| {
        let query = strategy.query_template.replace("{term}", term);
        match year {
            Some(year) => query.replace("{year}", &year.to_string()),
            None => query,
        }
    };

    if !strategy.query_template.contains("{year}") {
        return terms
            .into_iter()
            .map(|term| QueryVariant {
                query: render(term, None),
                year: None,
            })
            .collect();
    }

    strategy
        .year_range
        .years()
        .into_iter()
        .flat_map(|year| {
            terms.iter().map(move |term| QueryVariant {
                query: render(*term, Some(year)),
                year: Some(year),
            })
        })
        .collect()
}
