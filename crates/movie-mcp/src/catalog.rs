//! Static movie catalogue compiled into the binary.

use crate::models::{Genre, Movie, Rating};

const MOVIES_JSON: &str = include_str!("../data/movies.json");

/// Read-only movie dataset.
#[derive(Debug, Clone)]
pub struct MovieCatalog {
    movies: Vec<Movie>,
}

impl MovieCatalog {
    /// Load the bundled dataset.
    pub fn bundled() -> Result<Self, serde_json::Error> {
        Self::from_json(MOVIES_JSON)
    }

    /// Load a dataset from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            movies: serde_json::from_str(json)?,
        })
    }

    /// Build from already-parsed movies.
    #[must_use]
    pub fn from_movies(movies: Vec<Movie>) -> Self {
        Self { movies }
    }

    /// All movies, in dataset order.
    #[must_use]
    pub fn all(&self) -> &[Movie] {
        &self.movies
    }

    /// Movies tagged with `genre`.
    #[must_use]
    pub fn by_genre(&self, genre: Genre) -> Vec<&Movie> {
        self.movies.iter().filter(|m| m.has_genre(genre)).collect()
    }

    /// Movies with exactly `rating`.
    #[must_use]
    pub fn by_rating(&self, rating: Rating) -> Vec<&Movie> {
        self.movies.iter().filter(|m| m.rating == rating).collect()
    }

    /// Highest rated first, ties broken by IMDB rating.
    #[must_use]
    pub fn top_rated(&self, limit: usize) -> Vec<&Movie> {
        let mut sorted: Vec<&Movie> = self.movies.iter().collect();
        sorted.sort_by(|a, b| {
            b.average_rating
                .total_cmp(&a.average_rating)
                .then(b.imdb_rating.unwrap_or(0.0).total_cmp(&a.imdb_rating.unwrap_or(0.0)))
        });
        sorted.truncate(limit);
        sorted
    }

    /// Case-insensitive substring match on title, description and cast.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&Movie> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.movies
            .iter()
            .filter(|m| {
                m.title.to_lowercase().contains(&query)
                    || m.description.to_lowercase().contains(&query)
                    || m.cast.iter().any(|actor| actor.to_lowercase().contains(&query))
            })
            .collect()
    }

    /// Exact title match, case-insensitive, falling back to the first partial match.
    #[must_use]
    pub fn by_title(&self, title: &str) -> Option<&Movie> {
        let wanted = title.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.movies
            .iter()
            .find(|m| m.title.to_lowercase() == wanted)
            .or_else(|| self.movies.iter().find(|m| m.title.to_lowercase().contains(&wanted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MovieCatalog {
        MovieCatalog::bundled().unwrap()
    }

    #[test]
    fn test_bundled_dataset_loads() {
        assert!(catalog().all().len() >= 10);
    }

    #[test]
    fn test_by_genre() {
        let action = catalog().by_genre(Genre::Action).len();
        assert!(action > 0);
        assert!(catalog().by_genre(Genre::Action).iter().all(|m| m.has_genre(Genre::Action)));
    }

    #[test]
    fn test_top_rated_sorted() {
        let catalog = catalog();
        let top = catalog.top_rated(5);
        assert_eq!(top.len(), 5);
        assert!(top.windows(2).all(|w| w[0].average_rating >= w[1].average_rating));
        assert_eq!(top[0].title, "The Dark Knight");
    }

    #[test]
    fn test_search_matches_cast() {
        let catalog = catalog();
        let hits = catalog.search("heath ledger");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "The Dark Knight");
        assert!(catalog.search("   ").is_empty());
    }

    #[test]
    fn test_by_title() {
        let catalog = catalog();
        assert_eq!(catalog.by_title("inception").unwrap().id, "1");
        assert_eq!(catalog.by_title("Budapest").unwrap().id, "4");
        assert!(catalog.by_title("Nonexistent Film").is_none());
    }
}
