//! Movie catalogue types.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Movie genre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Genre {
    Action,
    Adventure,
    Comedy,
    Crime,
    Drama,
    Fantasy,
    Horror,
    Mystery,
    Romance,
    #[serde(rename = "Science Fiction")]
    ScienceFiction,
    Thriller,
}

impl Genre {
    /// Every genre, in display order.
    pub const ALL: [Self; 11] = [
        Self::Action,
        Self::Adventure,
        Self::Comedy,
        Self::Crime,
        Self::Drama,
        Self::Fantasy,
        Self::Horror,
        Self::Mystery,
        Self::Romance,
        Self::ScienceFiction,
        Self::Thriller,
    ];

    /// Display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Action => "Action",
            Self::Adventure => "Adventure",
            Self::Comedy => "Comedy",
            Self::Crime => "Crime",
            Self::Drama => "Drama",
            Self::Fantasy => "Fantasy",
            Self::Horror => "Horror",
            Self::Mystery => "Mystery",
            Self::Romance => "Romance",
            Self::ScienceFiction => "Science Fiction",
            Self::Thriller => "Thriller",
        }
    }

    /// Comma-separated list of every genre name.
    #[must_use]
    pub fn names() -> String {
        Self::ALL.iter().map(|g| g.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl FromStr for Genre {
    type Err = String;

    /// Case-insensitive; accepts "sci-fi" and "scifi" for Science Fiction.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if matches!(wanted.as_str(), "sci-fi" | "scifi") {
            return Ok(Self::ScienceFiction);
        }
        Self::ALL
            .into_iter()
            .find(|g| g.as_str().to_lowercase() == wanted)
            .ok_or_else(|| format!("unknown genre '{}'", s.trim()))
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MPAA rating, ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rating {
    G,
    #[serde(rename = "PG")]
    Pg,
    #[serde(rename = "PG-13")]
    Pg13,
    R,
    #[serde(rename = "NC-17")]
    Nc17,
}

impl Rating {
    /// Every rating, least restrictive first.
    pub const ALL: [Self; 5] = [Self::G, Self::Pg, Self::Pg13, Self::R, Self::Nc17];

    /// Display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::G => "G",
            Self::Pg => "PG",
            Self::Pg13 => "PG-13",
            Self::R => "R",
            Self::Nc17 => "NC-17",
        }
    }

    /// Suitable for a family audience.
    #[must_use]
    pub const fn is_family_friendly(self) -> bool {
        matches!(self, Self::G | Self::Pg)
    }

    /// Comma-separated list of every rating name.
    #[must_use]
    pub fn names() -> String {
        Self::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| format!("unknown rating '{}'", s.trim()))
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A movie in the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Running time in minutes.
    pub duration: u32,
    pub genres: Vec<Genre>,
    pub rating: Rating,
    pub release_date: NaiveDate,
    pub director: String,
    #[serde(default)]
    pub cast: Vec<String>,
    /// Average user rating on a 0-5 scale.
    pub average_rating: f32,
    #[serde(default)]
    pub total_reviews: u32,
    #[serde(default)]
    pub imdb_rating: Option<f32>,
    #[serde(default)]
    pub rotten_tomatoes_score: Option<u8>,
}

impl Movie {
    /// Whether the movie is tagged with `genre`.
    #[must_use]
    pub fn has_genre(&self, genre: Genre) -> bool {
        self.genres.contains(&genre)
    }

    /// Whether any genre name matches one of `names`, case-insensitively.
    #[must_use]
    pub fn matches_any_genre(&self, names: &[String]) -> bool {
        self.genres.iter().any(|g| names.iter().any(|n| n.eq_ignore_ascii_case(g.as_str())))
    }

    /// Release year.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.release_date.year()
    }

    /// Genre names joined with ", ".
    #[must_use]
    pub fn genre_list(&self) -> String {
        self.genres.iter().map(|g| g.as_str()).collect::<Vec<_>>().join(", ")
    }
}
