//! Input models for MCP tool parameters.

use serde::{Deserialize, Serialize};

/// Input for `suggest_movie`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestMovieInput {
    /// Genre name, case-insensitive (e.g., "Action").
    pub genre: String,
}

/// Input for `get_top_movies`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopMoviesInput {
    /// Restrict to one MPAA rating.
    #[serde(default)]
    pub rating: Option<String>,

    /// Maximum movies when no rating filter is given.
    #[serde(default = "default_top_limit")]
    pub limit: usize,
}

fn default_top_limit() -> usize {
    5
}

/// Input for `search_movies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMoviesInput {
    /// Matched against title, description and cast.
    pub query: String,
}
