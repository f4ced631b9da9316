use crate::{CausewayError, ErrorCode};

impl From<std::io::Error> for CausewayError {
    fn from(err: std::io::Error) -> Self {
        CausewayError::new(ErrorCode::IterationFailure, err.to_string())
    }
}

impl From<serde_json::Error> for CausewayError {
    fn from(err: serde_json::Error) -> Self {
        CausewayError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}

/// Find the registered name closest to `target`, used to build
/// "Did you mean ...?" hints for unknown plugin identifiers.
/// Ties keep the earliest registration.
pub fn find_closest_match(target: &str, options: &[String]) -> Option<String> {
    options
        .iter()
        .map(|option| (option, levenshtein(target, option)))
        .filter(|(_, distance)| *distance <= 3)
        .min_by_key(|(_, distance)| *distance)
        .map(|(option, _)| option.clone())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = (diagonal + usize::from(ca != cb))
                .min(above + 1)
                .min(row[j] + 1);
            diagonal = above;
        }
    }

    row[b_chars.len()]
}
