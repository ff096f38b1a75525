//! Elicitation forms.
//!
//! Forms use only primitive fields (string, integer, number, boolean); lists are
//! comma-separated strings.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A structured answer a tool can ask the user for.
pub trait ElicitationForm: DeserializeOwned + Send {
    /// Schema sent as `requestedSchema` and used to validate the answer.
    fn schema() -> Value;
}

/// Split a comma-separated form field into trimmed, non-empty items.
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Preferences for personalized recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Comma-separated genres.
    pub preferred_genres: String,
    #[serde(default = "default_max_duration")]
    pub max_duration_minutes: u32,
    #[serde(default = "default_min_rating")]
    pub min_rating: String,
    #[serde(default = "default_true")]
    pub include_foreign_films: bool,
    /// "Any" or a decade such as "1990s".
    #[serde(default = "default_any")]
    pub preferred_decade: String,
    #[serde(default = "default_any")]
    pub mood: String,
}

impl ElicitationForm for UserPreferences {
    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "preferred_genres": {
                    "type": "string",
                    "description": "Comma-separated genres, e.g. \"Action, Comedy\""
                },
                "max_duration_minutes": { "type": "integer", "minimum": 1, "default": 180 },
                "min_rating": {
                    "type": "string",
                    "enum": ["G", "PG", "PG-13", "R", "NC-17"],
                    "default": "G"
                },
                "include_foreign_films": { "type": "boolean", "default": true },
                "preferred_decade": {
                    "type": "string",
                    "description": "\"Any\" or a decade such as \"1990s\"",
                    "default": "Any"
                },
                "mood": { "type": "string", "default": "Any" }
            },
            "required": ["preferred_genres"]
        })
    }
}

/// Feedback on a set of recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationFeedback {
    /// Comma-separated titles.
    pub liked_movies: String,
    /// Comma-separated titles.
    pub disliked_movies: String,
    #[serde(default)]
    pub additional_preferences: String,
    /// 1-5.
    #[serde(default = "default_accuracy")]
    pub rating_accuracy: u8,
}

impl ElicitationForm for RecommendationFeedback {
    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "liked_movies": { "type": "string", "description": "Comma-separated titles" },
                "disliked_movies": { "type": "string", "description": "Comma-separated titles" },
                "additional_preferences": { "type": "string", "default": "" },
                "rating_accuracy": { "type": "integer", "minimum": 1, "maximum": 5, "default": 3 }
            },
            "required": ["liked_movies", "disliked_movies"]
        })
    }
}

/// Viewing context for a watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistPreferences {
    /// e.g. "feeling adventurous".
    pub mood: String,
    /// e.g. "2 hours", "90 minutes", "all evening".
    pub time_available: String,
    /// e.g. "alone", "family", "friends".
    pub company: String,
    #[serde(default)]
    pub preferred_genres: String,
    #[serde(default)]
    pub avoid_genres: String,
}

impl ElicitationForm for WatchlistPreferences {
    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "mood": { "type": "string" },
                "time_available": {
                    "type": "string",
                    "description": "e.g. \"2 hours\" or \"90 minutes\""
                },
                "company": {
                    "type": "string",
                    "description": "alone, family, date night, friends"
                },
                "preferred_genres": { "type": "string", "default": "" },
                "avoid_genres": { "type": "string", "default": "" }
            },
            "required": ["mood", "time_available", "company"]
        })
    }
}

/// Two titles and what to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieComparison {
    pub movie1_title: String,
    pub movie2_title: String,
    /// Comma-separated aspects: rating, genre, duration.
    pub comparison_aspects: String,
    #[serde(default = "default_true")]
    pub include_ratings: bool,
    #[serde(default = "default_true")]
    pub include_reviews: bool,
}

impl ElicitationForm for MovieComparison {
    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "movie1_title": { "type": "string", "minLength": 1 },
                "movie2_title": { "type": "string", "minLength": 1 },
                "comparison_aspects": {
                    "type": "string",
                    "description": "Comma-separated: rating, genre, duration"
                },
                "include_ratings": { "type": "boolean", "default": true },
                "include_reviews": { "type": "boolean", "default": true }
            },
            "required": ["movie1_title", "movie2_title", "comparison_aspects"]
        })
    }
}

const fn default_max_duration() -> u32 {
    180
}

fn default_min_rating() -> String {
    "G".to_string()
}

fn default_any() -> String {
    "Any".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_accuracy() -> u8 {
    3
}
