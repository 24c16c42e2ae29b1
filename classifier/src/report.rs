//! Human readable rendering of scores.

use crate::errors::CatdogResult;
use crate::runner::ScoreRow;

/// Cat and dog shares of a score, in percent. The model output is the dog
/// probability. Values are not clamped: an output outside of [0, 1] gives
/// percentages below 0 or above 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentages {
    pub cat: f32,
    pub dog: f32,
}

impl Percentages {
    pub fn from_score(score: f32) -> Percentages {
        Percentages { cat: 100.0 * (1.0 - score), dog: 100.0 * score }
    }
}

/// At most two decimals, without trailing zeros. Halves round away from
/// zero (`0.125` gives `0.13`).
pub fn format_percentage(value: f32) -> String {
    let rounded = (value as f64 * 100.0).round() / 100.0;
    let mut s = format!("{rounded:.2}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

pub fn report(path: &str, score: f32) -> String {
    let p = Percentages::from_score(score);
    format!(
        "Image {path} was {}% cat and {}% dog",
        format_percentage(p.cat),
        format_percentage(p.dog)
    )
}

/// One line per row, in row order. Fails without producing any line if a
/// row has no score.
pub fn report_rows(rows: &[ScoreRow]) -> CatdogResult<Vec<String>> {
    rows.iter().map(|row| Ok(report(&row.image_path, row.score()?))).collect()
}
