//! The champion/challenger decision rule.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::records::ChampionRecord;
use super::score::RegistryCandidate;
use crate::config::PromotionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Promote,
    NoPromotion,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Promote => "PROMOTE",
            Decision::NoPromotion => "NO_PROMOTION",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub reason_codes: Vec<String>,
}

impl DecisionOutcome {
    fn new(decision: Decision, reasons: &[&str]) -> Self {
        Self {
            decision,
            reason_codes: reasons.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Decide whether the top survivor replaces the current champion.
///
/// A challenger must beat the champion's score by at least
/// `score_epsilon`; a challenger that already is the champion never
/// promotes.
pub fn decide(
    challenger: Option<&RegistryCandidate>,
    champion: Option<&ChampionRecord>,
    config: &PromotionConfig,
) -> DecisionOutcome {
    let Some(challenger) = challenger else {
        return DecisionOutcome::new(
            Decision::NoPromotion,
            &["STAGE_B_SURVIVORS_EMPTY", "NO_STAGE_B_SURVIVORS"],
        );
    };
    let Some(champion) = champion else {
        return if config.promote_on_empty {
            DecisionOutcome::new(Decision::Promote, &["STAGE_B_SURVIVOR_PRESENT", "NO_EXISTING_CHAMPION"])
        } else {
            DecisionOutcome::new(
                Decision::NoPromotion,
                &["STAGE_B_SURVIVOR_PRESENT", "NO_EXISTING_CHAMPION_PROMOTION_DISABLED"],
            )
        };
    };

    let present = ["STAGE_B_SURVIVOR_PRESENT", "CURRENT_CHAMPION_PRESENT"];
    let (decision, extra): (Decision, [&str; 2]) = if champion.candidate_id == challenger.candidate_id {
        return DecisionOutcome::new(
            Decision::NoPromotion,
            &[present[0], present[1], "CHAMPION_ALREADY_TOP_SURVIVOR"],
        );
    } else if challenger.q1_registry_score >= champion.q1_registry_score + config.score_epsilon {
        (Decision::Promote, ["Q1_REGISTRY_SCORE_IMPROVED", "SCORE_EPSILON_MET"])
    } else {
        (
            Decision::NoPromotion,
            ["SCORE_IMPROVEMENT_BELOW_EPSILON", "SCORE_EPSILON_NOT_MET"],
        )
    };
    DecisionOutcome::new(decision, &[present[0], present[1], extra[0], extra[1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::score::tests::candidate;
    use crate::registry::states::CandidateState;
    use serde_json::Map;

    fn champion(candidate_id: &str, score: f64) -> ChampionRecord {
        ChampionRecord {
            slot: "default".into(),
            champion_id: "q1champ_000000000000".into(),
            candidate_id: candidate_id.into(),
            family: "TSMOM".into(),
            q1_registry_score: score,
            source_run_id: "stageb_x".into(),
            state: CandidateState::Live,
            promoted_at: "2024-06-28T00:00:00Z".into(),
            metrics: Map::new(),
        }
    }

    fn config() -> PromotionConfig {
        PromotionConfig::default()
    }

    #[test]
    fn no_survivors() {
        let out = decide(None, Some(&champion("a", 0.5)), &config());
        assert_eq!(out.decision, Decision::NoPromotion);
        assert_eq!(out.reason_codes, vec!["STAGE_B_SURVIVORS_EMPTY", "NO_STAGE_B_SURVIVORS"]);
    }

    #[test]
    fn empty_registry_promotes_unless_disabled() {
        let c = candidate("a", 0.3);
        let out = decide(Some(&c), None, &config());
        assert_eq!(out.decision, Decision::Promote);
        assert_eq!(out.reason_codes, vec!["STAGE_B_SURVIVOR_PRESENT", "NO_EXISTING_CHAMPION"]);

        let disabled = PromotionConfig {
            promote_on_empty: false,
            ..config()
        };
        let out = decide(Some(&c), None, &disabled);
        assert_eq!(out.decision, Decision::NoPromotion);
        assert_eq!(out.reason_codes[1], "NO_EXISTING_CHAMPION_PROMOTION_DISABLED");
    }

    #[test]
    fn champion_already_on_top() {
        let out = decide(Some(&candidate("a", 0.9)), Some(&champion("a", 0.5)), &config());
        assert_eq!(out.decision, Decision::NoPromotion);
        assert_eq!(
            out.reason_codes,
            vec!["STAGE_B_SURVIVOR_PRESENT", "CURRENT_CHAMPION_PRESENT", "CHAMPION_ALREADY_TOP_SURVIVOR"]
        );
    }

    #[test]
    fn epsilon_band_blocks_noise_level_improvements() {
        let champ = champion("old", 0.50);
        let out = decide(Some(&candidate("new", 0.505)), Some(&champ), &config());
        assert_eq!(out.decision, Decision::NoPromotion);
        assert!(out.reason_codes.contains(&"SCORE_IMPROVEMENT_BELOW_EPSILON".to_string()));
        assert!(out.reason_codes.contains(&"SCORE_EPSILON_NOT_MET".to_string()));

        let out = decide(Some(&candidate("new", 0.52)), Some(&champ), &config());
        assert_eq!(out.decision, Decision::Promote);
        assert_eq!(
            out.reason_codes,
            vec![
                "STAGE_B_SURVIVOR_PRESENT",
                "CURRENT_CHAMPION_PRESENT",
                "Q1_REGISTRY_SCORE_IMPROVED",
                "SCORE_EPSILON_MET"
            ]
        );
    }

    #[test]
    fn decision_serializes_screaming() {
        assert_eq!(serde_json::to_string(&Decision::NoPromotion).unwrap(), "\"NO_PROMOTION\"");
        assert_eq!(Decision::Promote.to_string(), "PROMOTE");
    }
}
