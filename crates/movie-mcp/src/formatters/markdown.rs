//! Markdown output formatting.

use crate::models::Movie;

/// Format a list of movies as Markdown under `heading`.
#[must_use]
pub fn format_movie_list(movies: &[&Movie], heading: &str) -> String {
    if movies.is_empty() {
        return format!("No {heading} found.");
    }

    let mut output = format!("# {heading} ({} results)\n\n", movies.len());

    for (i, movie) in movies.iter().enumerate() {
        output.push_str(&format_movie_markdown(movie, i + 1));
        output.push_str("\n---\n\n");
    }

    output
}

/// Format a single movie as Markdown.
#[must_use]
pub fn format_movie_markdown(movie: &Movie, index: usize) -> String {
    let mut output = format!("## {index}. {} ({})\n\n", movie.title, movie.year());

    output.push_str(&format!("{}\n\n", movie.description));

    let mut meta = vec![
        format!("**Rated**: {}", movie.rating),
        format!("**Runtime**: {} min", movie.duration),
    ];
    if let Some(imdb) = movie.imdb_rating {
        meta.push(format!("**IMDB**: {imdb:.1}/10"));
    }
    if let Some(score) = movie.rotten_tomatoes_score {
        meta.push(format!("**Rotten Tomatoes**: {score}%"));
    }
    output.push_str(&format!("{}\n\n", meta.join(" | ")));

    output.push_str(&format!("**Genres**: {}\n\n", movie.genre_list()));
    output.push_str(&format!("**Director**: {}\n", movie.director));

    if !movie.cast.is_empty() {
        output.push_str(&format!("\n**Cast**: {}\n", movie.cast.join(", ")));
    }

    output
}

/// Side-by-side comparison of two movies on the requested aspects.
///
/// Recognized aspects contain "rating", "genre" or "duration"; others are ignored.
#[must_use]
pub fn format_movie_comparison(
    first: &Movie,
    second: &Movie,
    aspects: &[String],
    include_ratings: bool,
) -> String {
    let mut output = format!("# Movie Comparison: {} vs {}\n\n", first.title, second.title);
    let mut sections = 0;

    for aspect in aspects {
        let aspect = aspect.to_lowercase();
        if aspect.contains("rating") && include_ratings {
            output.push_str("## Ratings\n\n");
            for movie in [first, second] {
                let imdb = movie
                    .imdb_rating
                    .map_or_else(|| "N/A".to_string(), |r| format!("{r:.1}"));
                let rating = movie.rating;
                output.push_str(&format!("- **{}**: {rating} (IMDB: {imdb})\n", movie.title));
            }
        } else if aspect.contains("genre") {
            output.push_str("## Genres\n\n");
            for movie in [first, second] {
                output.push_str(&format!("- **{}**: {}\n", movie.title, movie.genre_list()));
            }
        } else if aspect.contains("duration") {
            output.push_str("## Duration\n\n");
            for movie in [first, second] {
                output.push_str(&format!("- **{}**: {} minutes\n", movie.title, movie.duration));
            }
        } else {
            continue;
        }
        output.push('\n');
        sections += 1;
    }

    if sections == 0 {
        output.push_str("No comparable aspects requested. Try: rating, genre, duration.\n");
    }

    output
}
