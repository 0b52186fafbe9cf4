//! Records owned by the registry, and their content-derived ids.

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use quantlab_core::domain::short_id;

use super::decision::Decision;
use super::ledger::LedgerEntry;
use super::score::RegistryCandidate;
use super::states::CandidateState;
use super::store::StoreRecord;

pub const DECISION_SCHEMA: &str = "quantlab_promotion_decision_v1";
pub const EVENT_SCHEMA: &str = "quantlab_promotion_event_v1";
pub const STATE_EVENT_SCHEMA: &str = "quantlab_candidate_state_event_v1";
pub const CHAMPION_SCHEMA: &str = "quantlab_champion_state_v1";

pub fn champion_id(run_id: &str, candidate_id: &str) -> String {
    short_id(
        "q1champ_",
        &json!({"stage_b_run_id": run_id, "candidate_id": candidate_id}),
        12,
    )
}

pub fn decision_id(run_id: &str, decision: Decision, challenger: Option<&str>, champion_before: Option<&str>) -> String {
    short_id(
        "dec_",
        &json!({
            "stage_b_run_id": run_id,
            "decision": decision.as_str(),
            "challenger_candidate_id": challenger,
            "champion_before_id": champion_before,
        }),
        16,
    )
}

pub fn event_id(run_id: &str, decision: Decision, candidate_id: &str, old_champion: Option<&str>) -> String {
    short_id(
        "ev_",
        &json!({
            "stage_b_run_id": run_id,
            "decision": decision.as_str(),
            "candidate_id": candidate_id,
            "old_champion_id": old_champion,
        }),
        16,
    )
}

pub fn state_event_id(
    candidate_id: &str,
    prev: Option<CandidateState>,
    new: CandidateState,
    run_id: &str,
) -> String {
    short_id(
        "csev_",
        &json!({
            "cid": candidate_id,
            "from": prev.map(CandidateState::as_str),
            "to": new.as_str(),
            "run": run_id,
        }),
        20,
    )
}

/// One registry update, keyed by Stage B run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub stage_a_run_id: String,
    pub ok: bool,
    pub exit_code: i32,
    pub report_path: String,
    pub report_hash: String,
    pub candidates_total: usize,
    pub survivors_total: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCandidateRecord {
    pub run_id: String,
    pub candidate_id: String,
    pub family: String,
    pub q1_registry_score: f64,
    pub pass: bool,
    pub dsr_proxy: f64,
    pub psr_proxy: f64,
    pub metrics: Map<String, Value>,
}

impl RunCandidateRecord {
    pub fn new(run_id: &str, candidate: &RegistryCandidate) -> Self {
        Self {
            run_id: run_id.to_string(),
            candidate_id: candidate.candidate_id.clone(),
            family: candidate.family.clone(),
            q1_registry_score: candidate.q1_registry_score,
            pass: candidate.pass,
            dsr_proxy: candidate.dsr_proxy,
            psr_proxy: candidate.psr_proxy,
            metrics: candidate.metrics.clone(),
        }
    }
}

/// The current champion of a slot. Exactly one per slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionRecord {
    pub slot: String,
    pub champion_id: String,
    pub candidate_id: String,
    pub family: String,
    pub q1_registry_score: f64,
    pub source_run_id: String,
    pub state: CandidateState,
    pub promoted_at: String,
    pub metrics: Map<String, Value>,
}

impl ChampionRecord {
    pub fn promote(slot: &str, run_id: &str, candidate: &RegistryCandidate, ts: &str) -> Self {
        Self {
            slot: slot.to_string(),
            champion_id: champion_id(run_id, &candidate.candidate_id),
            candidate_id: candidate.candidate_id.clone(),
            family: candidate.family.clone(),
            q1_registry_score: candidate.q1_registry_score,
            source_run_id: run_id.to_string(),
            state: CandidateState::Live,
            promoted_at: ts.to_string(),
            metrics: candidate.metrics.clone(),
        }
    }

    /// The JSON written to `current_champion.json` and the history store.
    pub fn side_file(&self) -> Value {
        let mut payload = json!({ "schema": CHAMPION_SCHEMA });
        if let (Value::Object(out), Ok(Value::Object(fields))) = (&mut payload, serde_json::to_value(self)) {
            out.extend(fields);
        }
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStateRecord {
    pub candidate_id: String,
    pub family: String,
    pub state: CandidateState,
    pub source_run_id: String,
    pub updated_at: String,
    pub reason_codes: Vec<String>,
    pub q1_registry_score: f64,
    pub champion_id: Option<String>,
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub stage_b_candidates_total: usize,
    pub stage_b_survivors_total: usize,
    pub challenger_q1_registry_score: Option<f64>,
    pub champion_q1_registry_score_before: Option<f64>,
    pub score_epsilon: f64,
    pub state_before: Option<CandidateState>,
    pub state_after: Option<CandidateState>,
}

/// One decision per registry run, PROMOTE or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub schema: String,
    pub decision_id: String,
    pub ts: String,
    pub stage_b_run_id: String,
    pub decision: Decision,
    pub champion_before_id: Option<String>,
    pub challenger_candidate_id: Option<String>,
    pub champion_after_id: Option<String>,
    pub reason_codes: Vec<String>,
    pub summary_metrics: SummaryMetrics,
    pub artifacts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaMetrics {
    pub old_score: Option<f64>,
    pub new_score: f64,
}

/// Emitted only for PROMOTE decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionEvent {
    pub schema: String,
    pub event_id: String,
    pub ts: String,
    pub event_type: String,
    pub stage_b_run_id: String,
    pub old_champion_id: Option<String>,
    pub new_champion_id: String,
    pub candidate_id: String,
    pub reason_codes: Vec<String>,
    pub delta_metrics: DeltaMetrics,
    pub artifacts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEventDetails {
    pub source_stage_b_run_id: String,
    pub q1_registry_score: f64,
    pub champion_id: Option<String>,
    pub prev_source_stage_b_run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStateEvent {
    pub schema: String,
    pub event_id: String,
    pub ts: String,
    pub stage_b_run_id: String,
    pub event_type: String,
    pub candidate_id: String,
    pub family: String,
    pub prev_state: Option<CandidateState>,
    pub new_state: CandidateState,
    /// Sorted and unique.
    pub reason_codes: Vec<String>,
    pub details: StateEventDetails,
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn opt_text(s: Option<&str>) -> SqlValue {
    s.map_or(SqlValue::Null, text)
}

impl StoreRecord for RunRecord {
    const TABLE: &'static str = "runs";
    const KEY: &'static [&'static str] = &["run_id"];
    const VOLATILE: &'static [&'static str] = &["created_at"];

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("run_id", text(&self.run_id)),
            ("stage_a_run_id", text(&self.stage_a_run_id)),
            ("ok", SqlValue::Integer(i64::from(self.ok))),
            ("created_at", text(&self.created_at)),
        ]
    }
}

impl StoreRecord for RunCandidateRecord {
    const TABLE: &'static str = "run_candidates";
    const KEY: &'static [&'static str] = &["run_id", "candidate_id"];

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("run_id", text(&self.run_id)),
            ("candidate_id", text(&self.candidate_id)),
            ("family", text(&self.family)),
            ("q1_registry_score", SqlValue::Real(self.q1_registry_score)),
            ("pass", SqlValue::Integer(i64::from(self.pass))),
        ]
    }
}

impl StoreRecord for ChampionRecord {
    const TABLE: &'static str = "champion_state";
    const KEY: &'static [&'static str] = &["slot"];

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("slot", text(&self.slot)),
            ("champion_id", text(&self.champion_id)),
            ("candidate_id", text(&self.candidate_id)),
        ]
    }
}

impl StoreRecord for CandidateStateRecord {
    const TABLE: &'static str = "candidate_registry_state";
    const KEY: &'static [&'static str] = &["candidate_id"];
    const VOLATILE: &'static [&'static str] = &["updated_at"];

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("candidate_id", text(&self.candidate_id)),
            ("state", text(self.state.as_str())),
            ("source_run_id", text(&self.source_run_id)),
        ]
    }
}

impl StoreRecord for PromotionDecision {
    const TABLE: &'static str = "promotion_decisions";
    const KEY: &'static [&'static str] = &["decision_id"];
    const APPEND_ONLY: bool = true;

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("decision_id", text(&self.decision_id)),
            ("ts", text(&self.ts)),
            ("stage_b_run_id", text(&self.stage_b_run_id)),
            ("decision", text(self.decision.as_str())),
        ]
    }
}

impl StoreRecord for PromotionEvent {
    const TABLE: &'static str = "promotion_events";
    const KEY: &'static [&'static str] = &["event_id"];
    const APPEND_ONLY: bool = true;

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("event_id", text(&self.event_id)),
            ("ts", text(&self.ts)),
            ("stage_b_run_id", text(&self.stage_b_run_id)),
            ("candidate_id", text(&self.candidate_id)),
            ("old_champion_id", opt_text(self.old_champion_id.as_deref())),
        ]
    }
}

impl StoreRecord for CandidateStateEvent {
    const TABLE: &'static str = "candidate_state_events";
    const KEY: &'static [&'static str] = &["event_id"];
    const APPEND_ONLY: bool = true;

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("event_id", text(&self.event_id)),
            ("ts", text(&self.ts)),
            ("stage_b_run_id", text(&self.stage_b_run_id)),
            ("candidate_id", text(&self.candidate_id)),
        ]
    }
}

impl LedgerEntry for PromotionDecision {
    fn ledger_id(&self) -> &str {
        &self.decision_id
    }

    fn ledger_ts(&self) -> &str {
        &self.ts
    }
}

impl LedgerEntry for PromotionEvent {
    fn ledger_id(&self) -> &str {
        &self.event_id
    }

    fn ledger_ts(&self) -> &str {
        &self.ts
    }
}

impl LedgerEntry for CandidateStateEvent {
    fn ledger_id(&self) -> &str {
        &self.event_id
    }

    fn ledger_ts(&self) -> &str {
        &self.ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_ignore_timestamps_and_have_fixed_shape() {
        let a = champion_id("stageb_r1", "tsmom_20d");
        assert_eq!(a, champion_id("stageb_r1", "tsmom_20d"));
        assert_ne!(a, champion_id("stageb_r2", "tsmom_20d"));
        assert!(a.starts_with("q1champ_"));
        assert_eq!(a.len(), "q1champ_".len() + 12);

        let d = decision_id("stageb_r1", Decision::Promote, Some("x"), None);
        assert_eq!(d.len(), "dec_".len() + 16);
        assert_ne!(d, decision_id("stageb_r1", Decision::NoPromotion, Some("x"), None));

        let e = event_id("stageb_r1", Decision::Promote, "x", None);
        assert_eq!(e.len(), "ev_".len() + 16);

        let s = state_event_id("x", None, CandidateState::Shadow, "stageb_r1");
        assert_eq!(s.len(), "csev_".len() + 20);
        assert_ne!(s, state_event_id("x", Some(CandidateState::Live), CandidateState::Shadow, "stageb_r1"));
    }

    #[test]
    fn champion_side_file_carries_schema() {
        let c = crate::registry::score::tests::candidate("tsmom_20d", 0.6);
        let champ = ChampionRecord::promote("default", "stageb_r1", &c, "2024-06-28T00:00:00Z");
        let file = champ.side_file();
        assert_eq!(file["schema"], CHAMPION_SCHEMA);
        assert_eq!(file["candidate_id"], "tsmom_20d");
        assert_eq!(file["state"], "live");
        let back: ChampionRecord = serde_json::from_value(file).unwrap();
        assert_eq!(back, champ);
    }
}
