use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown phase state: {0}")]
    UnknownState(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown phase kind: {0}")]
    UnknownKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::UnknownState("sleeping".to_string());
        assert!(error.to_string().contains("sleeping"));
    }
}
