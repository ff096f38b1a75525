//! Elicitation tools that ask the user for a form mid-call.
//!
//! Registered as `suggest_movie_elicitation`, `build_personalized_watchlist` and
//! `compare_movies_elicitation`.
//!
//! These tools pause mid-call to ask the user for a form. When the user declines or
//! the session ends early they fall back to a plain answer instead of failing the call.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use super::{McpTool, ToolCallResult, ToolContext};
use crate::catalog::MovieCatalog;
use crate::error::{ElicitationError, ToolError, ToolResult};
use crate::formatters;
use crate::models::{
    Movie, MovieComparison, Rating, RecommendationFeedback, UserPreferences, WatchlistPreferences,
    split_list,
};

/// Maximum movies in a preference-based suggestion.
const MAX_SUGGESTIONS: usize = 10;

/// Maximum movies in a watchlist.
const MAX_WATCHLIST: usize = 8;

/// Duration filter is skipped at or above this value.
const UNBOUNDED_DURATION: u32 = 300;

static TIME_BUDGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|minutes?|mins?|m)\b")
        .expect("valid time budget pattern")
});

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Personalized suggestions from an elicited preference form.
pub struct SuggestMovieElicitationTool;

#[async_trait::async_trait]
impl McpTool for SuggestMovieElicitationTool {
    fn name(&self) -> &'static str {
        "suggest_movie_elicitation"
    }

    fn description(&self) -> &'static str {
        "Suggest movies interactively: asks for viewing preferences (genres, maximum runtime, \
         minimum rating, decade), recommends matching movies, then asks for feedback."
    }

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    async fn execute(&self, ctx: &ToolContext, _input: Value) -> ToolResult<ToolCallResult> {
        tracing::info!("Starting elicitation-based movie suggestion");

        let preferences = match ctx
            .elicit_form::<UserPreferences>("What are your movie preferences?")
            .await
        {
            Ok(preferences) => preferences,
            Err(ToolError::Elicitation(ElicitationError::Declined)) => {
                let general = ctx.catalog.top_rated(5);
                let text = format!(
                    "No preferences provided. Here are some general recommendations.\n\n{}",
                    formatters::format_movie_list(&general, "top movies")
                );
                return Ok(ToolCallResult::text(text));
            }
            Err(e) => {
                return Ok(fallback(&e, "Use suggest_movie with a genre parameter instead."));
            }
        };

        let movies = movies_by_preferences(&ctx.catalog, &preferences);
        let mut response = formatters::format_movie_list(&movies, "personalized recommendations");

        match ctx
            .elicit_form::<RecommendationFeedback>("How did you like these recommendations?")
            .await
        {
            Ok(feedback) => {
                let liked = split_list(&feedback.liked_movies);
                if !liked.is_empty() {
                    let remembered: Vec<&str> = liked.iter().take(3).map(String::as_str).collect();
                    response.push_str(&format!(
                        "\nBased on your feedback, we'll remember you liked: {}\n",
                        remembered.join(", ")
                    ));
                } else if feedback.rating_accuracy > 3 {
                    response.push_str(&format!(
                        "\nThank you for the positive feedback (rating: {}/5)!\n",
                        feedback.rating_accuracy
                    ));
                }
            }
            // Feedback is optional; the recommendations stand on their own.
            Err(e) => tracing::debug!(error = %e, "Feedback elicitation skipped"),
        }

        Ok(ToolCallResult::text(response))
    }
}

/// Watchlist built from mood, available time and company.
pub struct PersonalizedWatchlistTool;

#[async_trait::async_trait]
impl McpTool for PersonalizedWatchlistTool {
    fn name(&self) -> &'static str {
        "build_personalized_watchlist"
    }

    fn description(&self) -> &'static str {
        "Build a personalized watchlist: asks about mood, available time and company, \
         then picks movies that fit (family viewing keeps to G and PG)."
    }

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    async fn execute(&self, ctx: &ToolContext, _input: Value) -> ToolResult<ToolCallResult> {
        tracing::info!("Building personalized watchlist with elicitation");

        let preferences = match ctx
            .elicit_form::<WatchlistPreferences>(
                "What kind of movie experience are you looking for?",
            )
            .await
        {
            Ok(preferences) => preferences,
            Err(ToolError::Elicitation(ElicitationError::Declined)) => {
                return Ok(ToolCallResult::text(
                    "No preferences provided, so no watchlist was built.",
                ));
            }
            Err(e) => return Ok(fallback(&e, "Please try again later.")),
        };

        let movies = watchlist(&ctx.catalog, &preferences);
        let text = formatters::format_movie_list(&movies, "personalized watchlist");
        Ok(ToolCallResult::text(text))
    }
}

/// Side-by-side comparison of two elicited titles.
pub struct CompareMoviesTool;

#[async_trait::async_trait]
impl McpTool for CompareMoviesTool {
    fn name(&self) -> &'static str {
        "compare_movies_elicitation"
    }

    fn description(&self) -> &'static str {
        "Compare two movies: asks which titles to compare and which aspects matter \
         (rating, genre, duration)."
    }

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    async fn execute(&self, ctx: &ToolContext, _input: Value) -> ToolResult<ToolCallResult> {
        tracing::info!("Comparing movies with elicitation");

        let comparison = match ctx
            .elicit_form::<MovieComparison>(
                "Which movies would you like to compare and what aspects interest you?",
            )
            .await
        {
            Ok(comparison) => comparison,
            Err(ToolError::Elicitation(ElicitationError::Declined)) => {
                return Ok(ToolCallResult::text(
                    "No comparison criteria provided. \
                     Please specify movies and aspects to compare.",
                ));
            }
            Err(e) => return Ok(fallback(&e, "Please try again later.")),
        };

        let first = ctx.catalog.by_title(&comparison.movie1_title);
        let second = ctx.catalog.by_title(&comparison.movie2_title);
        let (Some(first), Some(second)) = (first, second) else {
            return Ok(ToolCallResult::error(
                "One or both movies not found. Please check the movie titles.",
            ));
        };

        let aspects = split_list(&comparison.comparison_aspects);
        Ok(ToolCallResult::text(formatters::format_movie_comparison(
            first,
            second,
            &aspects,
            comparison.include_ratings,
        )))
    }
}

fn fallback(error: &ToolError, hint: &str) -> ToolCallResult {
    tracing::warn!(error = %error, "Elicitation failed");
    ToolCallResult::error(format!("{} {hint}", error.to_user_message()))
}

/// Filter and rank the catalogue by a preference form.
#[must_use]
pub fn movies_by_preferences<'a>(
    catalog: &'a MovieCatalog,
    preferences: &UserPreferences,
) -> Vec<&'a Movie> {
    let genres = split_list(&preferences.preferred_genres);
    let min_rating = preferences.min_rating.parse::<Rating>().ok();
    let decade = parse_decade(&preferences.preferred_decade);

    let mut movies: Vec<&Movie> = catalog
        .all()
        .iter()
        .filter(|m| genres.is_empty() || m.matches_any_genre(&genres))
        .filter(|m| {
            preferences.max_duration_minutes >= UNBOUNDED_DURATION
                || m.duration <= preferences.max_duration_minutes
        })
        .filter(|m| min_rating.is_none_or(|min| m.rating >= min))
        .filter(|m| decade.is_none_or(|start| (start..start + 10).contains(&m.year())))
        .collect();

    rank(&mut movies, MAX_SUGGESTIONS);
    movies
}

/// Filter and rank the catalogue for a watchlist.
#[must_use]
pub fn watchlist<'a>(
    catalog: &'a MovieCatalog,
    preferences: &WatchlistPreferences,
) -> Vec<&'a Movie> {
    let budget = parse_time_budget(&preferences.time_available);
    let family = preferences.company.to_lowercase().contains("family");
    let wanted = split_list(&preferences.preferred_genres);
    let avoided = split_list(&preferences.avoid_genres);

    let mut movies: Vec<&Movie> = catalog
        .all()
        .iter()
        .filter(|m| budget.is_none_or(|minutes| m.duration <= minutes))
        .filter(|m| !family || m.rating.is_family_friendly())
        .filter(|m| wanted.is_empty() || m.matches_any_genre(&wanted))
        .filter(|m| !m.matches_any_genre(&avoided))
        .collect();

    rank(&mut movies, MAX_WATCHLIST);
    movies
}

fn rank(movies: &mut Vec<&Movie>, limit: usize) {
    movies.sort_by(|a, b| b.average_rating.total_cmp(&a.average_rating));
    movies.truncate(limit);
}

/// "1990s" or "1990" to 1990. "Any" and unparseable values disable the filter.
fn parse_decade(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("any") {
        return None;
    }
    let year: i32 = raw.trim_end_matches(['s', 'S']).parse().ok()?;
    Some(year - year.rem_euclid(10))
}

/// Minutes available, from phrases like "2 hours" or "90 minutes".
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_time_budget(raw: &str) -> Option<u32> {
    let captures = TIME_BUDGET.captures(raw)?;
    let amount: f64 = captures[1].parse().ok()?;
    let unit = captures[2].to_lowercase();
    let minutes = if unit.starts_with('h') { amount * 60.0 } else { amount };
    Some(minutes.round() as u32)
}
