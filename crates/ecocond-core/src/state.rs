use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Ecosystem condition state a layer contributes to.
/// Declaration order is the canonical processing and output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EcosystemState {
    Physical,
    Chemical,
    Compositional,
    Structural,
    Functional,
    Landscape,
}

impl EcosystemState {
    pub const ALL: [EcosystemState; 6] = [
        EcosystemState::Physical,
        EcosystemState::Chemical,
        EcosystemState::Compositional,
        EcosystemState::Structural,
        EcosystemState::Functional,
        EcosystemState::Landscape,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EcosystemState::Physical => "Physical",
            EcosystemState::Chemical => "Chemical",
            EcosystemState::Compositional => "Compositional",
            EcosystemState::Structural => "Structural",
            EcosystemState::Functional => "Functional",
            EcosystemState::Landscape => "Landscape",
        }
    }

    /// Zero-based position in the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// File stem of the per-state output raster, e.g. `01_Physical`.
    pub fn output_stem(self) -> String {
        format!("{:02}_{}", self.index() + 1, self.as_str())
    }
}

impl fmt::Display for EcosystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EcosystemState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        EcosystemState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Validation(format!("unknown ecosystem state '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_matches_index() {
        for (i, state) in EcosystemState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
        assert!(EcosystemState::Physical < EcosystemState::Landscape);
    }

    #[test]
    fn output_stem_is_one_based_and_padded() {
        assert_eq!(EcosystemState::Physical.output_stem(), "01_Physical");
        assert_eq!(EcosystemState::Landscape.output_stem(), "06_Landscape");
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("structural".parse::<EcosystemState>().unwrap(), EcosystemState::Structural);
        assert_eq!(" Chemical ".parse::<EcosystemState>().unwrap(), EcosystemState::Chemical);
        assert!("Soil".parse::<EcosystemState>().is_err());
    }
}
