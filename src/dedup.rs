//! Approver deduplication.
//!
//! Lines are grouped by approver. Each group collapses onto its earliest line
//! (lowest creation sequence, then id) and that survivor takes the union of
//! the group's role hints. The reduction is idempotent and does not depend on
//! input order.
use super::request::ApprovalLine;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

fn precedes(a: &ApprovalLine, b: &ApprovalLine) -> bool {
    (a.seq, &a.id) < (b.seq, &b.id)
}

pub fn deduplicate(lines: Vec<ApprovalLine>) -> Vec<ApprovalLine> {
    let mut survivors: BTreeMap<String, ApprovalLine> = BTreeMap::new();

    for mut line in lines {
        match survivors.entry(line.approver.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(line);
            }
            Entry::Occupied(mut slot) => {
                let kept = slot.get_mut();
                if precedes(&line, kept) {
                    line.roles.append(&mut kept.roles);
                    *kept = line;
                } else {
                    kept.roles.append(&mut line.roles);
                }
            }
        }
    }

    let mut out: Vec<ApprovalLine> = survivors.into_values().collect();
    out.sort_by(|a, b| (a.seq, &a.id).cmp(&(b.seq, &b.id)));
    out
}

/// True when two lines share an approver.
pub fn has_duplicates(lines: &[ApprovalLine]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    lines.iter().any(|l| !seen.insert(l.approver.as_str()))
}
