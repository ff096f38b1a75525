//! Catalogue tools: suggest_movie, get_top_movies, search_movies.

use serde_json::{Value, json};

use super::{McpTool, ToolCallResult, ToolContext};
use crate::error::{ToolError, ToolResult};
use crate::formatters;
use crate::models::{Genre, Rating, SearchMoviesInput, SuggestMovieInput, TopMoviesInput};

/// Movies in one genre.
pub struct SuggestMovieTool;

#[async_trait::async_trait]
impl McpTool for SuggestMovieTool {
    fn name(&self) -> &'static str {
        "suggest_movie"
    }

    fn description(&self) -> &'static str {
        "Suggest movies based on genre. Returns every catalogue movie tagged with the genre, \
         with description, MPAA rating and IMDB score."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "genre": {
                    "type": "string",
                    "description": "Genre name (e.g., 'Action', 'Science Fiction')"
                }
            },
            "required": ["genre"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "genre": { "type": "string" },
                "titles": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["genre", "titles"]
        }))
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<ToolCallResult> {
        let params: SuggestMovieInput = serde_json::from_value(input)?;
        tracing::info!(genre = %params.genre, "Suggesting movies for genre");

        let genre: Genre = params.genre.parse().map_err(|_| {
            ToolError::validation(
                "genre",
                format!("Invalid genre: {}. Please use one of: {}", params.genre, Genre::names()),
            )
        })?;

        let movies = ctx.catalog.by_genre(genre);
        let titles: Vec<&str> = movies.iter().map(|m| m.title.as_str()).collect();
        let structured = json!({ "genre": genre.as_str(), "titles": titles });

        let text = formatters::format_movie_list(&movies, &format!("{genre} movies"));
        Ok(ToolCallResult::text(text).with_structured(structured))
    }
}

/// Top rated movies, or every movie with one MPAA rating.
pub struct TopMoviesTool;

#[async_trait::async_trait]
impl McpTool for TopMoviesTool {
    fn name(&self) -> &'static str {
        "get_top_movies"
    }

    fn description(&self) -> &'static str {
        "Get top rated movies, optionally filtered by MPAA rating (G, PG, PG-13, R, NC-17)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "rating": {
                    "type": "string",
                    "description": "MPAA rating filter (e.g., 'PG-13')"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 50,
                    "default": 5,
                    "description": "Number of movies when no rating filter is given"
                }
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<ToolCallResult> {
        let params: TopMoviesInput = serde_json::from_value(input)?;
        tracing::info!(rating = ?params.rating, "Getting top movies");

        let (movies, heading) = match &params.rating {
            Some(raw) => {
                let rating: Rating = raw.parse().map_err(|_| {
                    ToolError::validation(
                        "rating",
                        format!("Invalid rating: {raw}. Please use one of: {}", Rating::names()),
                    )
                })?;
                (ctx.catalog.by_rating(rating), format!("{rating} movies"))
            }
            None => (ctx.catalog.top_rated(params.limit), "top movies".to_string()),
        };

        Ok(ToolCallResult::text(formatters::format_movie_list(&movies, &heading)))
    }
}

/// Free-text movie search.
pub struct SearchMoviesTool;

#[async_trait::async_trait]
impl McpTool for SearchMoviesTool {
    fn name(&self) -> &'static str {
        "search_movies"
    }

    fn description(&self) -> &'static str {
        "Search for movies by title, description, or cast member."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Text to look for (e.g., 'Nolan', 'heist')"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<ToolCallResult> {
        let params: SearchMoviesInput = serde_json::from_value(input)?;
        tracing::info!(query = %params.query, "Searching movies");

        let movies = ctx.catalog.search(&params.query);
        let heading = format!("movies matching '{}'", params.query.trim());
        Ok(ToolCallResult::text(formatters::format_movie_list(&movies, &heading)))
    }
}
