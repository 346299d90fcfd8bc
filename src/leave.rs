//! Pre-submit checks for leave adjustments.
use super::error::ValidationError;
use super::policy::SubmitGuard;
use super::request::{AdjustmentDirection, ApprovableRequest, RequestState, Subject};
use super::store::RequestStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// One live leave adjustment per requester and date. Rejected and reverted
/// adjustments do not count.
pub struct UniqueAdjustmentDate;

/// An adjustment may not be dated before today.
pub struct AdjustmentDateNotPast;

/// Added days are non-negative, reduced days are negative.
pub struct AdjustmentSign;

fn adjustment_date(request: &ApprovableRequest) -> Option<chrono::NaiveDate> {
    match &request.subject {
        Subject::LeaveAdjustment { date, .. } => Some(date.date()),
        _ => None,
    }
}

impl SubmitGuard for UniqueAdjustmentDate {
    fn check(&self, request: &ApprovableRequest, store: &RequestStore) -> Result<(), ValidationError> {
        let Some(date) = adjustment_date(request) else {
            return Ok(());
        };
        let others = store.list().map_err(|e| {
            warn!(error = %e, "could not scan requests for duplicate dates");
            ValidationError::Guard("Could not check for duplicate adjustments".to_string())
        })?;

        let clash = others.iter().any(|other| {
            other.id != request.id
                && other.requester == request.requester
                && !matches!(other.state, RequestState::Rejected | RequestState::Reverted)
                && adjustment_date(other) == Some(date)
        });
        if clash {
            return Err(ValidationError::DuplicateDate);
        }
        Ok(())
    }
}

impl SubmitGuard for AdjustmentDateNotPast {
    fn check(&self, request: &ApprovableRequest, _: &RequestStore) -> Result<(), ValidationError> {
        match adjustment_date(request) {
            Some(date) if date < Utc::now().date_naive() => Err(ValidationError::DateInPast),
            _ => Ok(()),
        }
    }
}

impl SubmitGuard for AdjustmentSign {
    fn check(&self, request: &ApprovableRequest, _: &RequestStore) -> Result<(), ValidationError> {
        if let Subject::LeaveAdjustment {
            direction, days, ..
        } = &request.subject
        {
            let ok = match direction {
                AdjustmentDirection::Add => *days >= 0.0,
                AdjustmentDirection::Reduce => *days < 0.0,
            };
            if !ok {
                return Err(ValidationError::AdjustmentSign);
            }
        }
        Ok(())
    }
}

/// Every leave-adjustment guard.
pub fn leave_guards() -> Vec<Arc<dyn SubmitGuard>> {
    vec![
        Arc::new(AdjustmentSign),
        Arc::new(AdjustmentDateNotPast),
        Arc::new(UniqueAdjustmentDate),
    ]
}
