//! Sweep results and the events streamed while a sweep runs

use std::fmt;
use serde::{ Serialize, Serializer };
use crate::{
    classify::TrialOutcome,
    grid::GridPoint,
    units::Nanosecond,
};

/// Per-outcome trial counters of one grid point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrialCounts
{
    pub glitches: u32,
    pub resets: u32,
    pub errors: u32,
    pub normal: u32,
}

impl TrialCounts
{
    pub fn record(&mut self, outcome: TrialOutcome)
    {
        match outcome {
            TrialOutcome::Glitch => self.glitches += 1,
            TrialOutcome::Reset => self.resets += 1,
            TrialOutcome::CommError => self.errors += 1,
            TrialOutcome::Normal => self.normal += 1,
        }
    }

    /// Number of trials which ran to a classification
    pub fn total(&self) -> u32
    {
        self.glitches + self.resets + self.errors + self.normal
    }
}

/// Fraction of trials at a point which glitched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlitchRate
{
    glitches: u32,
    total: u32,
}

impl GlitchRate
{
    pub fn new(glitches: u32, total: u32) -> Self
    {
        Self {
            glitches: glitches,
            total: total,
        }
    }

    /// The rate in percent, or `None` if no trial ran
    pub fn percent(&self) -> Option<f64>
    {
        if self.total == 0 {
            None
        }
        else {
            Some(self.glitches as f64 / self.total as f64 * 100.0)
        }
    }
}

impl fmt::Display for GlitchRate
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.percent() {
            Some(percent) => write!(f, "{:.1}%", percent),
            None => f.write_str("0%"),
        }
    }
}

impl Serialize for GlitchRate
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where S: Serializer
    {
        serializer.collect_str(self)
    }
}

/// The aggregated outcome of one grid point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointResult
{
    #[serde(flatten)]
    pub point: GridPoint,
    #[serde(flatten)]
    pub counts: TrialCounts,
    pub total: u32,
    /// The baseline ciphertext in effect when the point finished
    pub baseline: Option<String>,
    /// The last ciphertext the target answered with at this point
    pub last_observed: Option<String>,
    pub glitch_rate: GlitchRate,
}

impl PointResult
{
    pub fn new(
        point: GridPoint,
        counts: TrialCounts,
        baseline: Option<String>,
        last_observed: Option<String>) -> Self
    {
        let total = counts.total();

        Self {
            point: point,
            counts: counts,
            total: total,
            baseline: baseline,
            last_observed: last_observed,
            glitch_rate: GlitchRate::new(counts.glitches, total),
        }
    }

    pub fn tag(&self) -> PointTag
    {
        PointTag::from_counts(&self.counts)
    }

    /// Whether any trial at this point glitched
    pub fn is_sensitive(&self) -> bool
    {
        self.counts.glitches > 0
    }
}

/// Headline of a point's progress line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PointTag
{
    Glitch,
    Reset,
    Error,
    Normal,
}

impl PointTag
{
    /// Glitches outrank resets, which outrank errors
    pub fn from_counts(counts: &TrialCounts) -> Self
    {
        if counts.glitches > 0 {
            Self::Glitch
        }
        else if counts.resets > 0 {
            Self::Reset
        }
        else if counts.errors > 0 {
            Self::Error
        }
        else {
            Self::Normal
        }
    }
}

impl fmt::Display for PointTag
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Glitch => f.write_str("GLITCH"),
            Self::Reset => f.write_str("RESET"),
            Self::Error => f.write_str("ERROR"),
            Self::Normal => f.write_str("Normal"),
        }
    }
}

/// One progress line, paired with each [`PointResult`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress
{
    /// 1-based position of the point in the grid
    pub index: usize,
    pub total_points: usize,
    pub point: GridPoint,
    pub tag: PointTag,
    pub counts: TrialCounts,
}

impl fmt::Display for Progress
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "[{}/{}] {} -> {} (G:{} R:{} E:{} N:{})",
            self.index,
            self.total_points,
            self.point,
            self.tag,
            self.counts.glitches,
            self.counts.resets,
            self.counts.errors,
            self.counts.normal,
        )
    }
}

/// How a sweep ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SweepStatus
{
    Complete,
    Stopped,
    /// The sweep never started
    Aborted(String),
}

/// Totals of a finished sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary
{
    pub status: SweepStatus,
    /// Grid points reached, including abandoned ones
    pub points_visited: usize,
    pub total_points: usize,
    pub total_glitches: u32,
    pub total_resets: u32,
    /// Points with at least one glitch
    pub sensitive_points: usize,
}

impl SweepSummary
{
    pub fn from_results(
        status: SweepStatus,
        results: &[PointResult],
        points_visited: usize,
        total_points: usize) -> Self
    {
        Self {
            status: status,
            points_visited: points_visited,
            total_points: total_points,
            total_glitches: results.iter().map(|r| r.counts.glitches).sum(),
            total_resets: results.iter().map(|r| r.counts.resets).sum(),
            sensitive_points: results.iter().filter(|r| r.is_sensitive()).count(),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self
    {
        Self {
            status: SweepStatus::Aborted(reason.into()),
            points_visited: 0,
            total_points: 0,
            total_glitches: 0,
            total_resets: 0,
            sensitive_points: 0,
        }
    }
}

impl fmt::Display for SweepSummary
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match &self.status {
            SweepStatus::Complete => "COMPLETE",
            SweepStatus::Stopped => "STOPPED",
            SweepStatus::Aborted(reason) => return write!(f, "ABORTED: {}", reason),
        };

        write!(
            f,
            "{}: {}/{} points | Glitches: {} in {} points | Resets: {}",
            label,
            self.points_visited,
            self.total_points,
            self.total_glitches,
            self.sensitive_points,
            self.total_resets,
        )
    }
}

/// Something unusual which happened during a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly
{
    /// No reference ciphertext could be read, so no trial can be classified as a glitch
    NoBaseline,
    /// A delay sweep was requested from a device without a trigger offset control
    DelayUnsupported,
    /// The device did not arm after repeated attempts and the point was skipped
    ArmFailed { point: GridPoint, faults: Vec<String> },
    /// The device reset while being configured or armed and the point was skipped
    DeviceReset { point: GridPoint },
    /// A parameter could not be programmed and the point was skipped
    ConfigureFailed { point: GridPoint, param: &'static str, reason: String },
    /// The pulse width is outside the probe's usable window at this voltage
    OutsideProbeEnvelope { point: GridPoint, min: Nanosecond, max: Nanosecond },
    /// The target rebooted during a trial
    TargetReset { count: u32, point: GridPoint, trial: u32 },
    /// The target did not answer usefully during a trial
    CommError { point: GridPoint, trial: u32 },
    /// No new baseline could be read after a target reset; the previous one is kept
    RebaselineFailed,
}

impl fmt::Display for Anomaly
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::NoBaseline => {
                f.write_str("WARNING: Could not obtain baseline CT. Glitch detection may be inaccurate.")
            },
            Self::DelayUnsupported => {
                f.write_str("Trigger offset not supported by this device. Delay sweep is ignored.")
            },
            Self::ArmFailed { point, faults } if faults.is_empty() => {
                write!(f, "Arm failed {}, skipping", point)
            },
            Self::ArmFailed { point, faults } => {
                write!(f, "Arm failed {}, skipping (faults: {})", point, faults.join(", "))
            },
            Self::DeviceReset { point } => write!(f, "Pulse device reset at {}, skipping", point),
            Self::ConfigureFailed { point, param, reason } => {
                write!(f, "Could not set {} at {}: {}, skipping", param, point, reason)
            },
            Self::OutsideProbeEnvelope { point, min, max } => {
                write!(f, "{} is outside the probe's {}..={} pulse width window", point, min, max)
            },
            Self::TargetReset { count, point, trial } => {
                write!(f, "Target RESET #{} at {} pulse#{}", count, point, trial)
            },
            Self::CommError { point, trial } => write!(f, "No response from target at {} pulse#{}", point, trial),
            Self::RebaselineFailed => {
                f.write_str("Could not obtain a new baseline CT after reset, keeping the previous one")
            },
        }
    }
}

/// Everything a running sweep reports to its listener
#[derive(Debug, Clone, PartialEq)]
pub enum SweepEvent
{
    /// Operator-facing status text
    Log { level: tracing::Level, message: String },
    Anomaly(Anomaly),
    Point(PointResult),
    /// Always follows the matching [`SweepEvent::Point`]
    Progress(Progress),
    /// Always the last event of a sweep
    Finished(SweepSummary),
}

#[cfg(test)]
mod tests
{
    use super::{ GlitchRate, PointResult, PointTag, Progress, SweepStatus, SweepSummary, TrialCounts };
    use crate::{
        classify::TrialOutcome,
        grid::GridPoint,
        units::{ Volt, Nanosecond, Microsecond },
    };

    fn point() -> GridPoint
    {
        GridPoint {
            voltage: Volt::new(300),
            pulse_width: Nanosecond::new(160),
            delay: Microsecond::new(0),
        }
    }

    fn counts(outcomes: &[TrialOutcome]) -> TrialCounts
    {
        let mut counts = TrialCounts::default();
        outcomes.iter().for_each(|outcome| counts.record(*outcome));
        counts
    }

    #[test]
    fn rate_has_one_decimal()
    {
        assert_eq!(&GlitchRate::new(1, 4).to_string(), "25.0%");
        assert_eq!(&GlitchRate::new(1, 3).to_string(), "33.3%");
        assert_eq!(&GlitchRate::new(0, 5).to_string(), "0.0%");
        assert_eq!(&GlitchRate::new(5, 5).to_string(), "100.0%");
    }

    #[test]
    fn rate_without_trials_is_bare_zero()
    {
        let rate = GlitchRate::new(0, 0);

        assert_eq!(&rate.to_string(), "0%");
        assert_eq!(rate.percent(), None);
    }

    #[test]
    fn tag_priority()
    {
        use TrialOutcome::*;

        assert_eq!(PointTag::from_counts(&counts(&[Normal, CommError, Reset, Glitch])), PointTag::Glitch);
        assert_eq!(PointTag::from_counts(&counts(&[Normal, CommError, Reset])), PointTag::Reset);
        assert_eq!(PointTag::from_counts(&counts(&[Normal, CommError])), PointTag::Error);
        assert_eq!(PointTag::from_counts(&counts(&[Normal])), PointTag::Normal);
        assert_eq!(PointTag::from_counts(&counts(&[])), PointTag::Normal);
    }

    #[test]
    fn progress_line_format()
    {
        use TrialOutcome::*;

        let counts = counts(&[Glitch, Normal, Normal]);
        let progress = Progress {
            index: 3,
            total_points: 12,
            point: point(),
            tag: PointTag::from_counts(&counts),
            counts: counts,
        };

        assert_eq!(&progress.to_string(), "[3/12] V=300V PW=160ns D=0us -> GLITCH (G:1 R:0 E:0 N:2)");
    }

    #[test]
    fn summary_format()
    {
        use TrialOutcome::*;

        let results = vec![
            PointResult::new(point(), counts(&[Glitch, Glitch, Reset]), None, None),
            PointResult::new(point(), counts(&[Normal]), None, None),
            PointResult::new(point(), counts(&[Glitch, Reset]), None, None),
        ];

        let summary = SweepSummary::from_results(SweepStatus::Stopped, &results, 4, 6);
        assert_eq!(&summary.to_string(), "STOPPED: 4/6 points | Glitches: 3 in 2 points | Resets: 2");

        let summary = SweepSummary::from_results(SweepStatus::Complete, &[], 1, 1);
        assert_eq!(&summary.to_string(), "COMPLETE: 1/1 points | Glitches: 0 in 0 points | Resets: 0");

        let summary = SweepSummary::aborted("No target serial connection.");
        assert_eq!(&summary.to_string(), "ABORTED: No target serial connection.");
    }

    #[test]
    fn point_result_serializes_flat()
    {
        use TrialOutcome::*;

        let result = PointResult::new(
            point(),
            counts(&[Glitch, Normal, Normal, CommError]),
            Some("AABB".to_string()),
            Some("AABC".to_string()),
        );
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["voltage"], 300);
        assert_eq!(json["pulse_width"], 160);
        assert_eq!(json["glitches"], 1);
        assert_eq!(json["errors"], 1);
        assert_eq!(json["total"], 4);
        assert_eq!(json["glitch_rate"], "25.0%");
        assert_eq!(json["last_observed"], "AABC");
    }
}
