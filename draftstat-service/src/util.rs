use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListError {
    #[error("`{token}` is not a valid id")]
    InvalidId { token: String },
}

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Parse a comma-separated list of card or class ids.
pub fn parse_ids(s: &str) -> Result<Vec<i32>, ListError> {
    split_csv(s)
        .into_iter()
        .map(|token| {
            token
                .parse()
                .map_err(|_| ListError::InvalidId { token: token.clone() })
        })
        .collect()
}
