//! The fixed candidate catalogue.
//!
//! Every candidate is a linear combination of normalized features and the
//! trend gate. The catalogue order is the canonical output order for fold
//! metrics.

use crate::domain::Family;
use crate::normalize::Feature::{AtrPct14, BollZ20, EwmaVol20, LogAdv20, MacdHist, Ret20d, Rsi14};
use crate::normalize::{Feature, NormalizedRow};

/// One input of a candidate formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Term {
    Z(Feature),
    TrendGate,
}

impl Term {
    fn value(self, row: &NormalizedRow) -> f64 {
        match self {
            Term::Z(f) => row.z(f),
            Term::TrendGate => row.trend_gate,
        }
    }
}

/// A named, deterministic scoring formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: &'static str,
    pub family: Family,
    pub weights: &'static [(f64, Term)],
}

impl Candidate {
    pub fn score(&self, row: &NormalizedRow) -> f64 {
        self.weights.iter().map(|(w, t)| w * t.value(row)).sum()
    }
}

pub const CATALOGUE: [Candidate; 8] = [
    Candidate {
        id: "tsmom_20",
        family: Family::Tsmom,
        weights: &[(0.8, Term::Z(Ret20d)), (0.2, Term::TrendGate)],
    },
    Candidate {
        id: "tsmom_20_macd",
        family: Family::Tsmom,
        weights: &[(0.6, Term::Z(Ret20d)), (0.4, Term::Z(MacdHist))],
    },
    Candidate {
        id: "csmom_20_liq",
        family: Family::Csmom,
        weights: &[(0.7, Term::Z(Ret20d)), (0.3, Term::Z(LogAdv20))],
    },
    Candidate {
        id: "mr_rsi",
        family: Family::Meanrev,
        weights: &[(-1.0, Term::Z(Rsi14))],
    },
    Candidate {
        id: "mr_rsi_boll",
        family: Family::Meanrev,
        weights: &[(-0.6, Term::Z(Rsi14)), (-0.4, Term::Z(BollZ20))],
    },
    Candidate {
        id: "breakout_trend",
        family: Family::Breakout,
        weights: &[(0.6, Term::TrendGate), (0.4, Term::Z(MacdHist))],
    },
    Candidate {
        id: "vol_contraction",
        family: Family::Vol,
        weights: &[(-0.5, Term::Z(EwmaVol20)), (-0.5, Term::Z(AtrPct14))],
    },
    Candidate {
        id: "quality_liq_lowvol",
        family: Family::Quality,
        weights: &[(0.6, Term::Z(LogAdv20)), (-0.4, Term::Z(EwmaVol20))],
    },
];

/// Look up a catalogue entry by id.
pub fn find(id: &str) -> Option<&'static Candidate> {
    CATALOGUE.iter().find(|c| c.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn row() -> NormalizedRow {
        let mut z = [0.0; Feature::COUNT];
        z[Ret20d.index()] = 1.0;
        z[Rsi14.index()] = 2.0;
        z[BollZ20.index()] = -1.0;
        z[EwmaVol20.index()] = 0.5;
        z[LogAdv20.index()] = 3.0;
        NormalizedRow {
            z,
            trend_gate: -1.0,
            target: 0.0,
        }
    }

    #[test]
    fn catalogue_ids_are_unique() {
        let ids: HashSet<_> = CATALOGUE.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), CATALOGUE.len());
    }

    #[test]
    fn formulas_apply_weights() {
        let r = row();
        let score = |id| find(id).unwrap().score(&r);
        assert!((score("tsmom_20") - (0.8 - 0.2)).abs() < 1e-12);
        assert!((score("mr_rsi") + 2.0).abs() < 1e-12);
        assert!((score("mr_rsi_boll") - (-1.2 + 0.4)).abs() < 1e-12);
        assert!((score("quality_liq_lowvol") - (1.8 - 0.2)).abs() < 1e-12);
    }

    #[test]
    fn unknown_candidate_is_none() {
        assert!(find("carry_3m").is_none());
    }
}
