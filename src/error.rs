use crate::request::RequestState;

/// Caller-supplied data failed a precondition. Shown back to the caller
/// with the specific reason.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please provide a reason.")]
    BlankReason,
    #[error("Please select an approver to transfer to.")]
    MissingApprover,
    #[error("{0} already holds an approval line on this request")]
    ApproverConflict(String),
    #[error("Request has no approvers")]
    NoApprovers,
    #[error("Requester already has a leave adjustment for this date")]
    DuplicateDate,
    #[error("Adjustment date cannot be in the past")]
    DateInPast,
    #[error("Adjustment amount does not match its direction")]
    AdjustmentSign,
    #[error("{0}")]
    Guard(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    /// Unknown, consumed, expired, or the request is no longer submitted.
    /// Deliberately carries nothing about which of those it was.
    #[error("This link is no longer valid")]
    InvalidToken,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Request {0} not found")]
    NotFound(String),
    #[error("Request is {0}")]
    InvalidState(RequestState),
    #[error("{0} may not act on this request")]
    Forbidden(String),
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<minicbor::decode::Error> for ApprovalError {
    fn from(value: minicbor::decode::Error) -> Self {
        ApprovalError::Encoding(value.to_string())
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for ApprovalError {
    fn from(value: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        ApprovalError::Encoding(value.to_string())
    }
}
