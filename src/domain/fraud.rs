use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Risk band derived from a composite fraud score.
///
/// Deposits and withdrawals band differently: scrutiny starts lower for
/// withdrawals because funds leave the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn for_deposit(score: u32) -> Self {
        match score {
            s if s >= 80 => Self::Critical,
            s if s >= 60 => Self::High,
            s if s >= 30 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn for_withdrawal(score: u32) -> Self {
        match score {
            s if s >= 70 => Self::Critical,
            s if s >= 50 => Self::High,
            s if s >= 25 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Outcome of screening one payment request.
///
/// The score is additive across independent checks and is never capped.
/// `breakdown` keeps each check's contribution for audit; `flags` holds the
/// human-readable findings in the order they fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub flags: Vec<String>,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub breakdown: BTreeMap<String, u32>,
}
