use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signal family of a scoring candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Family {
    /// Time-series momentum.
    Tsmom,
    /// Cross-sectional momentum.
    Csmom,
    Meanrev,
    Breakout,
    /// Volatility contraction.
    Vol,
    /// Quality / liquidity.
    Quality,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Tsmom => "TSMOM",
            Family::Csmom => "CSMOM",
            Family::Meanrev => "MEANREV",
            Family::Breakout => "BREAKOUT",
            Family::Vol => "VOL",
            Family::Quality => "QUALITY",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown candidate family: {0}")]
pub struct UnknownFamily(pub String);

impl FromStr for Family {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TSMOM" => Ok(Family::Tsmom),
            "CSMOM" => Ok(Family::Csmom),
            "MEANREV" => Ok(Family::Meanrev),
            "BREAKOUT" => Ok(Family::Breakout),
            "VOL" => Ok(Family::Vol),
            "QUALITY" => Ok(Family::Quality),
            other => Err(UnknownFamily(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_string_forms_agree() {
        for fam in [
            Family::Tsmom,
            Family::Csmom,
            Family::Meanrev,
            Family::Breakout,
            Family::Vol,
            Family::Quality,
        ] {
            let json = serde_json::to_string(&fam).unwrap();
            assert_eq!(json, format!("\"{}\"", fam.as_str()));
            assert_eq!(fam.as_str().parse::<Family>().unwrap(), fam);
        }
    }

    #[test]
    fn unknown_family_is_rejected() {
        assert!("CARRY".parse::<Family>().is_err());
    }
}
