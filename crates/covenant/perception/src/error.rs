use thiserror::Error;

/// Errors from building the perception lexicons.
///
/// Classification and detection themselves never fail: unreadable input
/// yields a `NULL` signal or an all-zero dimensional state.
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("invalid pattern {id}: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern {id} has non-positive weight {weight}")]
    InvalidWeight { id: String, weight: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_weight_message_names_pattern() {
        let err = PerceptionError::InvalidWeight {
            id: "d2.decide_for_me".into(),
            weight: -1.0,
        };
        assert!(err.to_string().contains("d2.decide_for_me"));
    }
}
