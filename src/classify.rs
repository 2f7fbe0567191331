//! Trial outcome classification

use std::fmt;
use serde::{ Serialize, Deserialize };

/// What happened during a single trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome
{
    /// The target answered with the expected ciphertext, or no comparison was possible
    Normal,
    /// The target answered with a ciphertext different from the baseline
    Glitch,
    /// The target rebooted during the trial
    Reset,
    /// The target did not answer usefully
    CommError,
}

impl fmt::Display for TrialOutcome
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Glitch => f.write_str("glitch"),
            Self::Reset => f.write_str("reset"),
            Self::CommError => f.write_str("comm error"),
        }
    }
}

/// Compare an observed ciphertext against the baseline
///
/// A trial is only a glitch when both values are present and differ. Without a baseline every
/// answer is normal, so an unknown reference never produces false positives.
pub fn classify(baseline: Option<&str>, observed: &str) -> TrialOutcome
{
    match baseline {
        Some(baseline) if !baseline.is_empty() && !observed.is_empty() && baseline != observed => {
            TrialOutcome::Glitch
        },
        _ => TrialOutcome::Normal,
    }
}
