//! Completion evaluation for submitted requests.
use super::request::{ApprovalLine, RequestState};

/// The line mutation that just happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Approved,
    Refused,
    Transferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
    Stay,
}

impl Verdict {
    pub fn next_state(&self) -> Option<RequestState> {
        match self {
            Verdict::Approve => Some(RequestState::Approved),
            Verdict::Reject => Some(RequestState::Rejected),
            Verdict::Stay => None,
        }
    }
}

/// Decide whether a request leaves `submitted`.
///
/// A refusal rejects regardless of the other lines. Otherwise the request is
/// approved once every line is validated. Outside `submitted` nothing moves.
pub fn evaluate(state: RequestState, lines: &[ApprovalLine], mutation: Mutation) -> Verdict {
    if state != RequestState::Submitted {
        return Verdict::Stay;
    }
    if mutation == Mutation::Refused {
        return Verdict::Reject;
    }
    if !lines.is_empty() && lines.iter().all(|l| l.validated) {
        return Verdict::Approve;
    }
    Verdict::Stay
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn lines(validated: &[bool]) -> Vec<ApprovalLine> {
        validated
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut l =
                    ApprovalLine::new(format!("l{i}"), format!("user{i}"), BTreeSet::new(), i as u64);
                l.validated = *v;
                l
            })
            .collect()
    }

    #[test]
    fn all_validated_approves() {
        let v = evaluate(RequestState::Submitted, &lines(&[true, true]), Mutation::Approved);
        assert_eq!(v, Verdict::Approve);
        assert_eq!(v.next_state(), Some(RequestState::Approved));
    }

    #[test]
    fn partial_stays() {
        let v = evaluate(RequestState::Submitted, &lines(&[true, false]), Mutation::Approved);
        assert_eq!(v, Verdict::Stay);
    }

    #[test]
    fn refusal_rejects_even_when_others_validated() {
        let v = evaluate(RequestState::Submitted, &lines(&[true, false]), Mutation::Refused);
        assert_eq!(v, Verdict::Reject);
    }

    #[test]
    fn nothing_moves_outside_submitted() {
        for state in [
            RequestState::Draft,
            RequestState::Approved,
            RequestState::Rejected,
            RequestState::Reverted,
        ] {
            assert_eq!(evaluate(state, &lines(&[true]), Mutation::Approved), Verdict::Stay);
            assert_eq!(evaluate(state, &lines(&[false]), Mutation::Refused), Verdict::Stay);
        }
    }

    #[test]
    fn transfer_never_completes_on_its_own() {
        let v = evaluate(RequestState::Submitted, &lines(&[true, false]), Mutation::Transferred);
        assert_eq!(v, Verdict::Stay);
    }
}
