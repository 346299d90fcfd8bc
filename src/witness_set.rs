//! Append-only audit trail kept on every request.
//!
//! Each witness carries the digest of the witness before it, so a history that
//! has been edited or truncated in the middle no longer verifies.
use super::error::ApprovalError;
use super::request::{RequestState, TimeStamp};
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Witness {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub actor: String,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub witness_type: WitnessType,
    #[n(4)]
    pub prev_digest: String, // empty for the first witness
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum WitnessType {
    #[n(0)]
    Create,
    #[n(1)]
    LinesAdded {
        #[n(0)]
        approvers: Vec<String>,
    },
    #[n(2)]
    Submit {
        #[n(0)]
        approvers: Vec<String>,
    },
    #[n(3)]
    Approve {
        #[n(0)]
        line_id: String,
        #[n(1)]
        approved: u32,
        #[n(2)]
        total: u32,
    },
    #[n(4)]
    OverrideApprove,
    #[n(5)]
    FullyApproved,
    #[n(6)]
    Refuse {
        #[n(0)]
        reason: String,
    },
    #[n(7)]
    Revert {
        #[n(0)]
        previous: RequestState,
        #[n(1)]
        remark: Option<String>,
    },
    #[n(8)]
    Transfer {
        #[n(0)]
        line_id: String,
        #[n(1)]
        from: String,
        #[n(2)]
        to: String,
        #[n(3)]
        reason: Option<String>,
    },
}

impl Witness {
    pub fn new(
        request_id: String,
        actor: String,
        timestamp: TimeStamp<Utc>,
        witness_type: WitnessType,
        prev_digest: String,
    ) -> Self {
        Self {
            request_id,
            actor,
            timestamp,
            witness_type,
            prev_digest,
        }
    }
    /// Digest and CBOR encoding of this witness.
    pub fn build(&self) -> Result<(String, Vec<u8>), ApprovalError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
    /// Human-readable one-liner for history views.
    pub fn describe(&self) -> String {
        let what = match &self.witness_type {
            WitnessType::Create => "created the request".to_string(),
            WitnessType::LinesAdded { approvers } => {
                format!("added approvers {}", approvers.join(", "))
            }
            WitnessType::Submit { approvers } => {
                format!("submitted for approval by {}", approvers.join(", "))
            }
            WitnessType::Approve {
                approved, total, ..
            } => format!("approved ({approved} of {total} approvals received)"),
            WitnessType::OverrideApprove => "approved as administrator".to_string(),
            WitnessType::FullyApproved => "completed the final approval".to_string(),
            WitnessType::Refuse { reason } => format!("rejected: {reason}"),
            WitnessType::Revert { previous, remark } => match remark {
                Some(remark) => format!("reverted from {previous}: {remark}"),
                None => format!("reverted from {previous}"),
            },
            WitnessType::Transfer { from, to, reason, .. } => match reason {
                Some(reason) => format!("transferred approval from {from} to {to}: {reason}"),
                None => format!("transferred approval from {from} to {to}"),
            },
        };
        format!(
            "{} {} {}",
            self.timestamp.to_datetime_utc().format("%d-%b-%Y %H:%M:%S"),
            self.actor,
            what
        )
    }
}

/// Append a witness to `history`, linking it to the current tail.
pub fn append(
    history: &mut Vec<Witness>,
    request_id: &str,
    actor: &str,
    witness_type: WitnessType,
) -> Result<(), ApprovalError> {
    let prev_digest = match history.last() {
        Some(last) => last.build()?.0,
        None => String::new(),
    };
    history.push(Witness::new(
        request_id.to_string(),
        actor.to_string(),
        TimeStamp::new(),
        witness_type,
        prev_digest,
    ));
    Ok(())
}

/// Check that every witness links to its predecessor.
pub fn verify(history: &[Witness]) -> bool {
    let mut expected = String::new();
    for witness in history {
        if witness.prev_digest != expected {
            return false;
        }
        match witness.build() {
            Ok((digest, _)) => expected = digest,
            Err(_) => return false,
        }
    }
    true
}
