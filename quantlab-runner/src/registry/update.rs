//! One registry update per Stage B run.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use quantlab_core::domain::RunId;

use super::decision::{decide, Decision};
use super::index::PromotionIndex;
use super::ledger::Ledger;
use super::records::{
    decision_id, event_id, state_event_id, CandidateStateEvent, CandidateStateRecord, ChampionRecord, DeltaMetrics,
    PromotionDecision, PromotionEvent, RunCandidateRecord, RunRecord, StateEventDetails, SummaryMetrics,
    DECISION_SCHEMA, EVENT_SCHEMA, STATE_EVENT_SCHEMA,
};
use super::score::{rank_candidates, rank_survivors, read_candidates, RegistryCandidate};
use super::states::{assign_states, classify_transition, CandidateState};
use super::store::{RegistryStore, UpsertCounts, UpsertOutcome};
use super::{RegistryError, RegistryPaths};
use crate::artifacts;
use crate::config::PromotionConfig;
use crate::stages::stage_b::{read_run_report, StageBRunReport};
use crate::stages::require_file;

pub const REPORT_SCHEMA: &str = "quantlab.registry_update_report.v1";
pub const REPORT: &str = "registry_update_report.json";

/// `registry_<stage B run id>`.
pub fn registry_run_id(stage_b_run_id: &RunId) -> RunId {
    RunId::new(format!("registry_{stage_b_run_id}"))
}

pub fn report_path(quant_root: &Path, stage_b_run_id: &RunId) -> PathBuf {
    artifacts::run_dir(quant_root, registry_run_id(stage_b_run_id).as_str()).join(REPORT)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryUpdateCounts {
    pub stage_b_candidates_total: usize,
    pub stage_b_survivors_total: usize,
    pub candidate_states_written: usize,
    pub candidate_state_events_written: usize,
    /// live / shadow / retired.
    pub state_counts: BTreeMap<String, usize>,
    pub state_event_type_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryUpdateReport {
    pub schema: String,
    pub generated_at: String,
    pub ok: bool,
    pub exit_code: i32,
    pub stage_b_run_id: RunId,
    pub decision: PromotionDecision,
    pub event_written: bool,
    pub counts: RegistryUpdateCounts,
    /// Per ledger file name.
    pub ledger_appends: BTreeMap<String, UpsertCounts>,
    /// Per store table.
    pub store_writes: BTreeMap<String, UpsertCounts>,
    pub artifacts: BTreeMap<String, String>,
}

/// Everything one update computes, before anything is written.
#[derive(Debug, Clone)]
struct Plan {
    run: RunRecord,
    candidates: Vec<RegistryCandidate>,
    survivors_total: usize,
    decision: PromotionDecision,
    new_champion: Option<ChampionRecord>,
    event: Option<PromotionEvent>,
    states: Vec<CandidateStateRecord>,
    state_events: Vec<CandidateStateEvent>,
}

pub struct RegistryUpdate<'a> {
    config: &'a PromotionConfig,
    quant_root: PathBuf,
    paths: RegistryPaths,
}

impl<'a> RegistryUpdate<'a> {
    pub fn new(config: &'a PromotionConfig, quant_root: &Path) -> Self {
        Self {
            config,
            quant_root: quant_root.to_path_buf(),
            paths: RegistryPaths::new(quant_root),
        }
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    /// Score, decide, diff states and persist. `now` stamps every record
    /// written by this run and never feeds an id.
    pub fn run(&self, stage_b_run_id: &RunId, now: DateTime<Utc>) -> Result<RegistryUpdateReport, RegistryError> {
        let ts = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let run_report = read_run_report(&self.quant_root, stage_b_run_id)?;
        if !run_report.ok {
            return Err(RegistryError::RunNotOk(stage_b_run_id.to_string()));
        }

        let mut store = RegistryStore::open(&self.paths.db())?;
        let plan = self.plan(&store, &run_report, &ts)?;
        info!(
            run_id = %stage_b_run_id,
            decision = %plan.decision.decision,
            challenger = plan.decision.challenger_candidate_id.as_deref().unwrap_or("-"),
            champion_before = plan.decision.champion_before_id.as_deref().unwrap_or("-"),
            "registry decision"
        );

        // Ledgers first, then champion files, then the store commit.
        let mut ledger_appends = BTreeMap::new();
        let decisions = Ledger::<PromotionDecision>::new(self.paths.decisions_ledger());
        let events = Ledger::<PromotionEvent>::new(self.paths.events_ledger());
        let state_events = Ledger::<CandidateStateEvent>::new(self.paths.state_events_ledger());
        ledger_appends.insert(
            ledger_name(decisions.path()),
            tally(&decisions.append_all(std::slice::from_ref(&plan.decision))?),
        );
        ledger_appends.insert(
            ledger_name(events.path()),
            tally(&events.append_all(plan.event.as_slice())?),
        );
        ledger_appends.insert(
            ledger_name(state_events.path()),
            tally(&state_events.append_all(&plan.state_events)?),
        );

        if let Some(champion) = &plan.new_champion {
            let payload = champion.side_file();
            artifacts::atomic_write_json(&self.paths.current_champion(), &payload)?;
            artifacts::atomic_write_json(&self.paths.champion_history(&champion.champion_id), &payload)?;
        }

        let index = PromotionIndex::build(
            &decisions.read()?,
            &events.read()?,
            decisions.path(),
            events.path(),
            &ts,
        );
        artifacts::atomic_write_json(&self.paths.promotion_index(), &index)?;

        let ((), store_writes) = store.batch(|b| {
            b.upsert(&plan.run)?;
            for c in &plan.candidates {
                b.upsert(&RunCandidateRecord::new(&plan.run.run_id, c))?;
            }
            if let Some(champion) = &plan.new_champion {
                b.upsert(champion)?;
            }
            for s in &plan.states {
                b.upsert(s)?;
            }
            b.upsert(&plan.decision)?;
            if let Some(event) = &plan.event {
                b.upsert(event)?;
            }
            for e in &plan.state_events {
                b.upsert(e)?;
            }
            Ok(())
        })?;
        debug!(?store_writes, "registry store committed");

        let report = self.report(&plan, &ts, ledger_appends, store_writes, &run_report);
        artifacts::atomic_write_json(&report_path(&self.quant_root, stage_b_run_id), &report)?;
        info!(
            run_id = %stage_b_run_id,
            event_written = report.event_written,
            state_events = report.counts.candidate_state_events_written,
            "registry update written"
        );
        Ok(report)
    }

    fn plan(&self, store: &RegistryStore, run_report: &StageBRunReport, ts: &str) -> Result<Plan, RegistryError> {
        let run_id = run_report.run_id.as_str();
        let light_report = PathBuf::from(&run_report.stage_b_light_report);
        let candidates_path = PathBuf::from(&run_report.candidates);
        let survivors_path = PathBuf::from(&run_report.survivors);
        for path in [&light_report, &candidates_path, &survivors_path] {
            require_file(path)?;
        }

        let mut candidates = read_candidates(&candidates_path)?;
        if candidates.is_empty() {
            return Err(RegistryError::NoCandidates(run_id.to_string()));
        }
        let mut survivors = read_candidates(&survivors_path)?;
        rank_candidates(&mut candidates);
        rank_survivors(&mut survivors);

        let current = store.champion(&self.config.slot)?;
        let prev_states = store.candidate_states()?;
        let challenger = survivors.first();
        let outcome = decide(challenger, current.as_ref(), self.config);
        let promoted = outcome.decision == Decision::Promote;

        let new_champion = match challenger {
            Some(c) if promoted => Some(ChampionRecord::promote(&self.config.slot, run_id, c, ts)),
            _ => None,
        };
        let champion_before_id = current.as_ref().map(|c| c.champion_id.clone());
        let champion_after = new_champion.as_ref().or(current.as_ref());
        let state_before = current.as_ref().map(|c| c.state);

        let artifact_refs = BTreeMap::from([
            (
                "stage_b_run_report".to_string(),
                artifacts::run_dir(&self.quant_root, run_id)
                    .join(crate::stages::stage_b::RUN_REPORT)
                    .display()
                    .to_string(),
            ),
            ("stage_b_light_report".to_string(), light_report.display().to_string()),
        ]);

        let challenger_id = challenger.map(|c| c.candidate_id.clone());
        let decision = PromotionDecision {
            schema: DECISION_SCHEMA.into(),
            decision_id: decision_id(
                run_id,
                outcome.decision,
                challenger_id.as_deref(),
                champion_before_id.as_deref(),
            ),
            ts: ts.to_string(),
            stage_b_run_id: run_id.to_string(),
            decision: outcome.decision,
            champion_before_id: champion_before_id.clone(),
            challenger_candidate_id: challenger_id,
            champion_after_id: champion_after.map(|c| c.champion_id.clone()),
            reason_codes: outcome.reason_codes.clone(),
            summary_metrics: SummaryMetrics {
                stage_b_candidates_total: candidates.len(),
                stage_b_survivors_total: survivors.len(),
                challenger_q1_registry_score: challenger.map(|c| c.q1_registry_score),
                champion_q1_registry_score_before: current.as_ref().map(|c| c.q1_registry_score),
                score_epsilon: self.config.score_epsilon,
                state_before,
                state_after: if promoted { Some(CandidateState::Live) } else { state_before },
            },
            artifacts: artifact_refs.clone(),
        };

        let event = new_champion.as_ref().map(|champion| PromotionEvent {
            schema: EVENT_SCHEMA.into(),
            event_id: event_id(
                run_id,
                outcome.decision,
                &champion.candidate_id,
                champion_before_id.as_deref(),
            ),
            ts: ts.to_string(),
            event_type: "PROMOTION".into(),
            stage_b_run_id: run_id.to_string(),
            old_champion_id: champion_before_id.clone(),
            new_champion_id: champion.champion_id.clone(),
            candidate_id: champion.candidate_id.clone(),
            reason_codes: outcome.reason_codes.clone(),
            delta_metrics: DeltaMetrics {
                old_score: current.as_ref().map(|c| c.q1_registry_score),
                new_score: champion.q1_registry_score,
            },
            artifacts: artifact_refs,
        });

        let mut states = Vec::new();
        let mut state_events = Vec::new();
        for a in assign_states(&candidates, &survivors, champion_after, promoted) {
            let prev = prev_states.get(&a.candidate_id);
            let prev_state = prev.map(|p| p.state);
            if let Some(transition) = classify_transition(prev_state, a.state) {
                let reason_codes: BTreeSet<String> = a
                    .reason_codes
                    .iter()
                    .cloned()
                    .chain(transition.reason_code().map(str::to_string))
                    .collect();
                state_events.push(CandidateStateEvent {
                    schema: STATE_EVENT_SCHEMA.into(),
                    event_id: state_event_id(&a.candidate_id, prev_state, a.state, run_id),
                    ts: ts.to_string(),
                    stage_b_run_id: run_id.to_string(),
                    event_type: transition.event_type().into(),
                    candidate_id: a.candidate_id.clone(),
                    family: a.family.clone(),
                    prev_state,
                    new_state: a.state,
                    reason_codes: reason_codes.into_iter().collect(),
                    details: StateEventDetails {
                        source_stage_b_run_id: run_id.to_string(),
                        q1_registry_score: a.q1_registry_score,
                        champion_id: a.champion_id.clone(),
                        prev_source_stage_b_run_id: prev.map(|p| p.source_run_id.clone()),
                    },
                });
            }
            states.push(CandidateStateRecord {
                candidate_id: a.candidate_id,
                family: a.family,
                state: a.state,
                source_run_id: run_id.to_string(),
                updated_at: ts.to_string(),
                reason_codes: a.reason_codes,
                q1_registry_score: a.q1_registry_score,
                champion_id: a.champion_id,
                metrics: a.metrics,
            });
        }

        let run_report_path = artifacts::run_dir(&self.quant_root, run_id).join(crate::stages::stage_b::RUN_REPORT);
        let run = RunRecord {
            run_id: run_id.to_string(),
            stage_a_run_id: run_report.stage_a_run_id.to_string(),
            ok: run_report.ok,
            exit_code: run_report.exit_code,
            report_path: run_report_path.display().to_string(),
            report_hash: artifacts::hash_file(&run_report_path)?,
            candidates_total: candidates.len(),
            survivors_total: survivors.len(),
            created_at: ts.to_string(),
        };

        Ok(Plan {
            run,
            survivors_total: survivors.len(),
            candidates,
            decision,
            new_champion,
            event,
            states,
            state_events,
        })
    }

    fn report(
        &self,
        plan: &Plan,
        ts: &str,
        ledger_appends: BTreeMap<String, UpsertCounts>,
        store_writes: BTreeMap<&'static str, UpsertCounts>,
        run_report: &StageBRunReport,
    ) -> RegistryUpdateReport {
        let mut state_counts: BTreeMap<String, usize> = CandidateState::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for s in &plan.states {
            *state_counts.entry(s.state.as_str().to_string()).or_default() += 1;
        }
        let mut state_event_type_counts = BTreeMap::new();
        for e in &plan.state_events {
            *state_event_type_counts.entry(e.event_type.clone()).or_default() += 1;
        }

        let artifacts = BTreeMap::from([
            ("registry_db".to_string(), self.paths.db().display().to_string()),
            (
                "promotion_decisions_ndjson".to_string(),
                self.paths.decisions_ledger().display().to_string(),
            ),
            (
                "promotion_events_ndjson".to_string(),
                self.paths.events_ledger().display().to_string(),
            ),
            (
                "candidate_state_events_ndjson".to_string(),
                self.paths.state_events_ledger().display().to_string(),
            ),
            (
                "promotion_index".to_string(),
                self.paths.promotion_index().display().to_string(),
            ),
            ("stage_b_light_report".to_string(), run_report.stage_b_light_report.clone()),
        ]);

        RegistryUpdateReport {
            schema: REPORT_SCHEMA.into(),
            generated_at: ts.to_string(),
            ok: true,
            exit_code: 0,
            stage_b_run_id: run_report.run_id.clone(),
            decision: plan.decision.clone(),
            event_written: plan.event.is_some(),
            counts: RegistryUpdateCounts {
                stage_b_candidates_total: plan.candidates.len(),
                stage_b_survivors_total: plan.survivors_total,
                candidate_states_written: plan.states.len(),
                candidate_state_events_written: plan.state_events.len(),
                state_counts,
                state_event_type_counts,
            },
            ledger_appends,
            store_writes: store_writes
                .into_iter()
                .map(|(table, counts)| (table.to_string(), counts))
                .collect(),
            artifacts,
        }
    }
}

fn ledger_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn tally(outcomes: &[UpsertOutcome]) -> UpsertCounts {
    let mut counts = UpsertCounts::default();
    for o in outcomes {
        counts.record(*o);
    }
    counts
}

/// Read a report written by [`RegistryUpdate::run`].
pub fn read_report(quant_root: &Path, stage_b_run_id: &RunId) -> Result<RegistryUpdateReport, RegistryError> {
    let path = report_path(quant_root, stage_b_run_id);
    require_file(&path)?;
    Ok(artifacts::read_json(&path)?)
}
