use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{HorizontalDomain, VerticalBand};

/// Output of the dimensional detector for one message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionalState {
    /// One score per vertical band, each in [0, 1]
    pub vertical: BTreeMap<VerticalBand, f64>,
    /// One score per horizontal domain, each in [0, 1]
    pub horizontal: BTreeMap<HorizontalDomain, f64>,
    pub integration: IntegrationMetrics,
    pub primary_vertical: VerticalBand,
    /// Every domain within epsilon of the maximum score; empty if nothing scored
    pub primary_horizontal: Vec<HorizontalDomain>,
    pub elevated_protection: bool,
    pub emergency_detected: bool,
}

impl DimensionalState {
    /// A state with every score at zero.
    pub fn empty() -> Self {
        Self {
            vertical: VerticalBand::ALL.iter().map(|b| (*b, 0.0)).collect(),
            horizontal: HorizontalDomain::ALL.iter().map(|d| (*d, 0.0)).collect(),
            integration: IntegrationMetrics::default(),
            primary_vertical: VerticalBand::Somatic,
            primary_horizontal: Vec::new(),
            elevated_protection: false,
            emergency_detected: false,
        }
    }

    pub fn vertical_score(&self, band: VerticalBand) -> f64 {
        self.vertical.get(&band).copied().unwrap_or(0.0)
    }

    pub fn horizontal_score(&self, domain: HorizontalDomain) -> f64 {
        self.horizontal.get(&domain).copied().unwrap_or(0.0)
    }

    /// Score of the primary vertical band.
    pub fn top_vertical_score(&self) -> f64 {
        self.vertical_score(self.primary_vertical)
    }
}

/// Integration metric bundle.
///
/// `phi` grows with both differentiation and coherence; `tension` grows when
/// mutually conflicting domains are simultaneously strong.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationMetrics {
    pub phi: f64,
    pub complexity: f64,
    pub coherence: f64,
    pub tension: f64,
}
