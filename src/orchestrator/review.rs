//! Human review over discovery findings and the selection handed to removal.
//!
//! The selection only changes on explicit user action; poll ticks never touch it.

use super::discovery::DiscoveryView;
use super::handoff::HandoffContext;
use crate::error::ValidationError;
use crate::model::{BrokerId, Finding, HandoffPayload};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectionSet {
    members: BTreeSet<BrokerId>,
}

fn selectable(findings: &[Finding], broker_id: BrokerId) -> bool {
    findings
        .iter()
        .any(|f| f.broker_id == broker_id && f.is_selectable())
}

impl SelectionSet {
    /// Flip membership of `broker_id`. Returns whether it is now selected.
    pub fn toggle(
        &mut self,
        findings: &[Finding],
        broker_id: BrokerId,
    ) -> Result<bool, ValidationError> {
        if !selectable(findings, broker_id) {
            return Err(ValidationError::NotSelectable(broker_id));
        }
        if self.members.remove(&broker_id) {
            Ok(false)
        } else {
            self.members.insert(broker_id);
            Ok(true)
        }
    }

    /// Replace the selection with every selectable finding, as of now.
    pub fn select_all(&mut self, findings: &[Finding]) -> usize {
        self.members = findings
            .iter()
            .filter(|f| f.is_selectable())
            .map(|f| f.broker_id)
            .collect();
        self.members.len()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn contains(&self, broker_id: BrokerId) -> bool {
        self.members.contains(&broker_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = BrokerId> + '_ {
        self.members.iter().copied()
    }

    /// Drop members whose finding is no longer selectable. Returns what was dropped.
    pub fn prune(&mut self, findings: &[Finding]) -> Vec<BrokerId> {
        let dropped: Vec<BrokerId> = self
            .members
            .iter()
            .copied()
            .filter(|id| !selectable(findings, *id))
            .collect();
        for id in &dropped {
            self.members.remove(id);
        }
        dropped
    }

    /// Finalise the selection into a handoff payload for removal.
    pub fn proceed(
        &mut self,
        discovery: &DiscoveryView,
        handoff: &mut HandoffContext,
    ) -> Result<HandoffPayload, ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        let profile_id = discovery
            .profile_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ValidationError::NoProfileSelected)?;

        let dropped = self.prune(&discovery.findings);
        if !dropped.is_empty() {
            tracing::info!(?dropped, "dropped selections that are no longer selectable");
        }
        if self.is_empty() {
            return Err(ValidationError::EmptySelection);
        }

        let payload = HandoffPayload {
            profile_id: profile_id.to_string(),
            broker_ids: self.iter().collect(),
        };
        handoff.offer(payload.clone());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn findings() -> Vec<Finding> {
        serde_json::from_value(json!([
            {"broker_id": 1, "found": true, "confidence": 0.9},
            {"broker_id": 2, "found": false},
            {"broker_id": 3, "found": true, "marked_false_positive": true},
            {"broker_id": 4, "found": true, "confidence": 0.6}
        ]))
        .unwrap()
    }

    fn view(findings: Vec<Finding>) -> DiscoveryView {
        DiscoveryView {
            profile_id: Some("P1".into()),
            findings,
            ..Default::default()
        }
    }

    #[test]
    fn toggle_flips_selectable_findings_only() {
        let f = findings();
        let mut sel = SelectionSet::default();

        assert_eq!(sel.toggle(&f, BrokerId(1)), Ok(true));
        assert!(sel.contains(BrokerId(1)));
        assert_eq!(sel.toggle(&f, BrokerId(1)), Ok(false));
        assert!(sel.is_empty());

        assert_eq!(
            sel.toggle(&f, BrokerId(2)),
            Err(ValidationError::NotSelectable(BrokerId(2)))
        );
        assert_eq!(
            sel.toggle(&f, BrokerId(3)),
            Err(ValidationError::NotSelectable(BrokerId(3)))
        );
        assert_eq!(
            sel.toggle(&f, BrokerId(99)),
            Err(ValidationError::NotSelectable(BrokerId(99)))
        );
        assert!(sel.is_empty());
    }

    #[test]
    fn select_all_is_a_snapshot() {
        let mut f = findings();
        let mut sel = SelectionSet::default();
        assert_eq!(sel.select_all(&f), 2);

        f[0].marked_false_positive = true;
        assert!(sel.contains(BrokerId(1)), "later marks do not shrink a snapshot");
        assert_eq!(sel.select_all(&f), 1);
        assert!(!sel.contains(BrokerId(1)));
    }

    #[test]
    fn proceed_rejects_empty_selection_without_handoff() {
        let mut sel = SelectionSet::default();
        let mut handoff = HandoffContext::default();
        assert_eq!(
            sel.proceed(&view(findings()), &mut handoff),
            Err(ValidationError::EmptySelection)
        );
        assert!(handoff.peek().is_none());
    }

    #[test]
    fn proceed_requires_a_profile() {
        let f = findings();
        let mut sel = SelectionSet::default();
        sel.toggle(&f, BrokerId(1)).unwrap();
        let mut handoff = HandoffContext::default();
        let mut v = view(f);
        v.profile_id = None;
        assert_eq!(
            sel.proceed(&v, &mut handoff),
            Err(ValidationError::NoProfileSelected)
        );
        assert!(handoff.peek().is_none());
    }

    #[test]
    fn proceed_drops_members_marked_false_positive_since_selection() {
        let mut f = findings();
        let mut sel = SelectionSet::default();
        sel.select_all(&f);
        f[3].marked_false_positive = true;

        let mut handoff = HandoffContext::default();
        let payload = sel.proceed(&view(f), &mut handoff).unwrap();
        assert_eq!(
            payload,
            HandoffPayload {
                profile_id: "P1".into(),
                broker_ids: vec![BrokerId(1)]
            }
        );
        assert_eq!(handoff.peek(), Some(&payload));
        assert_eq!(sel.len(), 1);
    }

    #[test]
    fn proceed_fails_when_every_member_became_unselectable() {
        let mut f = findings();
        let mut sel = SelectionSet::default();
        sel.toggle(&f, BrokerId(4)).unwrap();
        f[3].marked_false_positive = true;

        let mut handoff = HandoffContext::default();
        assert_eq!(
            sel.proceed(&view(f), &mut handoff),
            Err(ValidationError::EmptySelection)
        );
        assert!(handoff.peek().is_none());
    }

    #[test]
    fn selection_is_subset_of_selectable_at_handoff() {
        let mut f = findings();
        let mut sel = SelectionSet::default();
        sel.select_all(&f);
        f[0].found = false;

        let mut handoff = HandoffContext::default();
        let payload = sel.proceed(&view(f.clone()), &mut handoff).unwrap();
        for id in payload.broker_ids {
            assert!(f.iter().any(|x| x.broker_id == id && x.is_selectable()));
        }
    }
}
