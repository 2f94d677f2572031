use thiserror::Error;

use crate::types::Issn;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("insufficient records: loaded {loaded}, need at least {minimum}")]
    InsufficientRecords { loaded: usize, minimum: usize },

    #[error("merge blocked: journal {linking_identifier} has {priced_records} priced record(s)")]
    MergeBlocked {
        linking_identifier: Issn,
        priced_records: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("confirmation required: {} dependent identifier(s) would be deleted", .dependents.len())]
    ConfirmationRequired { dependents: Vec<Issn> },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("a reconciliation run is already in progress")]
    RunInProgress,

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IdentityError {
    /// Process exit code used by the operator CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Download(_) => 3,
            Self::InsufficientRecords { .. } => 4,
            Self::MergeBlocked { .. } => 5,
            Self::NotFound(_) => 6,
            Self::Conflict(_) => 7,
            Self::ConfirmationRequired { .. } => 8,
            Self::InvalidIdentifier(_) => 9,
            Self::RunInProgress => 10,
            Self::Internal(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issn(s: &str) -> Issn {
        s.parse().unwrap()
    }

    #[test]
    fn exit_codes_are_distinct_per_guard() {
        let blocked = IdentityError::MergeBlocked {
            linking_identifier: issn("0000-0019"),
            priced_records: 2,
        };
        let short = IdentityError::InsufficientRecords {
            loaded: 10,
            minimum: 2_000_000,
        };
        assert_eq!(blocked.exit_code(), 5);
        assert_eq!(short.exit_code(), 4);
        assert_eq!(IdentityError::Internal(anyhow::anyhow!("boom")).exit_code(), 1);
    }

    #[test]
    fn display_merge_blocked() {
        let e = IdentityError::MergeBlocked {
            linking_identifier: issn("0000-0019"),
            priced_records: 2,
        };
        assert_eq!(
            e.to_string(),
            "merge blocked: journal 0000-0019 has 2 priced record(s)"
        );
    }

    #[test]
    fn display_insufficient_records() {
        let e = IdentityError::InsufficientRecords {
            loaded: 5,
            minimum: 2_000_000,
        };
        assert_eq!(
            e.to_string(),
            "insufficient records: loaded 5, need at least 2000000"
        );
    }

    #[test]
    fn display_confirmation_required_counts_dependents() {
        let e = IdentityError::ConfirmationRequired {
            dependents: vec![issn("0000-0051"), issn("0000-0043")],
        };
        assert_eq!(
            e.to_string(),
            "confirmation required: 2 dependent identifier(s) would be deleted"
        );
    }

    #[test]
    fn display_invalid_identifier_quotes_input() {
        let e = IdentityError::InvalidIdentifier("12-34".into());
        assert_eq!(e.to_string(), "invalid identifier: \"12-34\"");
    }
}
