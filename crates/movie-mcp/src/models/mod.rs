//! Data models for the movie catalogue and tool parameters.

mod forms;
mod inputs;
mod movie;

pub use forms::{
    ElicitationForm, MovieComparison, RecommendationFeedback, UserPreferences,
    WatchlistPreferences, split_list,
};
pub use inputs::*;
pub use movie::{Genre, Movie, Rating};
