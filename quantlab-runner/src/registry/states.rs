//! Candidate lifecycle states and transition classification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

use super::records::ChampionRecord;
use super::score::RegistryCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateState {
    /// The current champion's candidate. At most one at a time.
    Live,
    /// Passed the gates and made the survivor cut, not champion.
    Shadow,
    /// Failed the gates, was capped out, or was displaced.
    Retired,
}

impl CandidateState {
    pub const ALL: [CandidateState; 3] = [CandidateState::Live, CandidateState::Shadow, CandidateState::Retired];

    pub fn as_str(self) -> &'static str {
        match self {
            CandidateState::Live => "live",
            CandidateState::Shadow => "shadow",
            CandidateState::Retired => "retired",
        }
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state a candidate takes in this run's snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StateAssignment {
    pub candidate_id: String,
    pub family: String,
    pub state: CandidateState,
    pub reason_codes: Vec<String>,
    pub q1_registry_score: f64,
    /// Set only for the live candidate.
    pub champion_id: Option<String>,
    pub metrics: Map<String, Value>,
}

/// Build the new snapshot for every Stage B candidate.
///
/// `champion_after` is the champion once this run's decision is applied:
/// the newly promoted record, or the unchanged current one.
pub fn assign_states(
    candidates: &[RegistryCandidate],
    survivors: &[RegistryCandidate],
    champion_after: Option<&ChampionRecord>,
    promoted: bool,
) -> Vec<StateAssignment> {
    let survivor_ids: BTreeSet<&str> = survivors.iter().map(|s| s.candidate_id.as_str()).collect();

    candidates
        .iter()
        .filter(|c| !c.candidate_id.is_empty())
        .map(|c| {
            let live = champion_after.filter(|ch| ch.candidate_id == c.candidate_id);
            let (state, reason_codes) = if live.is_some() {
                let mut reasons = vec!["CURRENT_LIVE_CHAMPION".to_string()];
                if promoted {
                    reasons.push("PROMOTED_IN_THIS_RUN".into());
                }
                (CandidateState::Live, reasons)
            } else if survivor_ids.contains(c.candidate_id.as_str()) {
                (CandidateState::Shadow, vec!["STAGE_B_LIGHT_SURVIVOR".to_string()])
            } else if c.pass {
                (CandidateState::Retired, vec!["NOT_SELECTED_IN_SURVIVOR_CAP".to_string()])
            } else {
                (CandidateState::Retired, vec!["STAGE_B_LIGHT_FAIL".to_string()])
            };
            StateAssignment {
                candidate_id: c.candidate_id.clone(),
                family: c.family.clone(),
                state,
                reason_codes,
                q1_registry_score: c.q1_registry_score,
                champion_id: live.map(|ch| ch.champion_id.clone()),
                metrics: c.metrics.clone(),
            }
        })
        .collect()
}

/// Classified change between two snapshots of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Discovered,
    DemotionToShadow,
    DemotionToRetired,
    PromotionToLive,
    RevivedToShadow,
    Other,
}

impl Transition {
    pub fn event_type(self) -> &'static str {
        match self {
            Transition::Discovered => "STATE_DISCOVERED",
            Transition::DemotionToShadow => "DEMOTION_TO_SHADOW",
            Transition::DemotionToRetired => "DEMOTION_TO_RETIRED",
            Transition::PromotionToLive => "PROMOTION_TO_LIVE",
            Transition::RevivedToShadow => "REVIVED_TO_SHADOW",
            Transition::Other => "STATE_TRANSITION",
        }
    }

    /// Reason code added on top of the new state's own reasons.
    pub fn reason_code(self) -> Option<&'static str> {
        match self {
            Transition::Discovered => Some("FIRST_OBSERVED_IN_CANDIDATE_REGISTRY"),
            Transition::DemotionToShadow => Some("LIVE_CANDIDATE_NOT_RESELECTED_AS_CHAMPION"),
            Transition::DemotionToRetired => Some("LIVE_CANDIDATE_FAILED_OR_NOT_SURVIVOR"),
            Transition::PromotionToLive => Some("SELECTED_AS_LIVE_CHAMPION"),
            Transition::RevivedToShadow => Some("REENTERED_STAGE_B_SURVIVORS"),
            Transition::Other => None,
        }
    }
}

/// `None` when the state did not change.
pub fn classify_transition(prev: Option<CandidateState>, new: CandidateState) -> Option<Transition> {
    use CandidateState::*;
    let transition = match (prev, new) {
        (Some(p), n) if p == n => return None,
        (None, _) => Transition::Discovered,
        (Some(Live), Shadow) => Transition::DemotionToShadow,
        (Some(Live), Retired) => Transition::DemotionToRetired,
        (Some(Shadow), Live) => Transition::PromotionToLive,
        (Some(Retired), Shadow) => Transition::RevivedToShadow,
        _ => Transition::Other,
    };
    Some(transition)
}
