//! Scripted stand-ins for the pulse device and the target board
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    time::Duration,
};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use arcs_glitch::{
    DeviceError, DeviceParam, LinkError, PulseDevice, SweepControl, SweepEvent, TargetLink,
};

pub const BASELINE_CT: &str = "AABBCC";

pub fn init_tracing()
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Take every event emitted so far
pub fn drain(events: &mut UnboundedReceiver<SweepEvent>) -> Vec<SweepEvent>
{
    let mut drained = Vec::new();

    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }

    drained
}

/// Every device interaction, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall
{
    Set(DeviceParam),
    Arm,
    Disarm,
    Fire,
    ClearFaults,
    ReadFaults,
}

/// How one scripted device call ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step
{
    Ok,
    Fault,
    Reset,
}

impl Step
{
    fn into_result(self) -> Result<(), DeviceError>
    {
        match self {
            Self::Ok => Ok(()),
            Self::Fault => Err(DeviceError::Fault("high voltage fault".to_string())),
            Self::Reset => Err(DeviceError::Reset),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockDevice
{
    pub armed: bool,
    pub calls: Vec<DeviceCall>,
    pub trigger_offset: bool,
    /// Outcomes of successive `arm` calls; success once exhausted
    pub arm_script: VecDeque<Step>,
    /// Fail whenever this voltage is programmed
    pub fail_voltage: Option<(u32, Step)>,
    pub faults: Vec<String>,
}

impl MockDevice
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn with_trigger_offset(mut self) -> Self
    {
        self.trigger_offset = true;
        self
    }

    pub fn arm_script<I>(mut self, steps: I) -> Self
        where I: IntoIterator<Item = Step>
    {
        self.arm_script = steps.into_iter().collect();
        self
    }

    pub fn fail_voltage(mut self, volts: u32, step: Step) -> Self
    {
        self.fail_voltage = Some((volts, step));
        self
    }

    pub fn faults(mut self, faults: &[&str]) -> Self
    {
        self.faults = faults.iter().map(|fault| fault.to_string()).collect();
        self
    }

    pub fn count(&self, call: DeviceCall) -> usize
    {
        self.calls.iter().filter(|made| **made == call).count()
    }

    pub fn params(&self) -> Vec<DeviceParam>
    {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Set(param) => Some(*param),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PulseDevice for MockDevice
{
    async fn set(&mut self, param: DeviceParam) -> Result<(), DeviceError>
    {
        self.calls.push(DeviceCall::Set(param));

        match (param, self.fail_voltage) {
            (DeviceParam::Voltage(volts), Some((fail_at, step))) if volts.get() == fail_at => step.into_result(),
            _ => Ok(()),
        }
    }

    fn supports_trigger_offset(&self) -> bool
    {
        self.trigger_offset
    }

    async fn arm(&mut self) -> Result<(), DeviceError>
    {
        self.calls.push(DeviceCall::Arm);
        let result = self.arm_script.pop_front().unwrap_or(Step::Ok).into_result();
        self.armed = result.is_ok();
        result
    }

    async fn disarm(&mut self) -> Result<(), DeviceError>
    {
        self.calls.push(DeviceCall::Disarm);
        self.armed = false;
        Ok(())
    }

    async fn is_armed(&mut self) -> Result<bool, DeviceError>
    {
        Ok(self.armed)
    }

    async fn fire(&mut self) -> Result<(), DeviceError>
    {
        self.calls.push(DeviceCall::Fire);
        Ok(())
    }

    async fn clear_faults(&mut self) -> Result<(), DeviceError>
    {
        self.calls.push(DeviceCall::ClearFaults);
        Ok(())
    }

    async fn read_faults(&mut self) -> Result<Vec<String>, DeviceError>
    {
        self.calls.push(DeviceCall::ReadFaults);
        Ok(self.faults.clone())
    }
}

/// What the target answers to one `START`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply
{
    Ciphertext(String),
    /// The boot banner in the middle of a response block
    Reset,
    Error,
    /// Nothing at all, so the exchange times out
    Silence,
    /// A response block which never ends
    Truncated(String),
}

impl Reply
{
    pub fn ct(ciphertext: &str) -> Self
    {
        Self::Ciphertext(ciphertext.to_string())
    }

    fn lines(&self) -> Vec<String>
    {
        let lines: Vec<&str> = match self {
            Self::Ciphertext(ct) => {
                return vec![
                    "START".to_string(),
                    "--- DATA_START ---".to_string(),
                    "PT:00112233445566778899AABBCCDDEEFF".to_string(),
                    format!("CT:{}", ct),
                    "--- DATA_END ---".to_string(),
                ];
            },
            Self::Truncated(ct) => {
                return vec!["--- DATA_START ---".to_string(), format!("CT:{}", ct)];
            },
            Self::Reset => vec!["--- DATA_START ---", "", "KW45 Ready. Waiting for commands..."],
            Self::Error => vec!["ERROR: 7"],
            Self::Silence => vec![],
        };

        lines.into_iter().map(str::to_string).collect()
    }
}

/// A target board which answers from a script
///
/// The `START` following a `MODE:` command is answered from `baselines`, where the last entry
/// repeats. Every other `START` is answered from `trials`, falling back to the baseline ciphertext
/// once the script runs out.
#[derive(Debug)]
pub struct ScriptedTarget
{
    pub open: bool,
    pub baselines: VecDeque<Reply>,
    pub trials: VecDeque<Reply>,
    /// Every line sent to the target
    pub sent: Vec<String>,
    pending: VecDeque<String>,
    awaiting_baseline: bool,
    starts: usize,
    stop_after: Option<(usize, SweepControl)>,
}

impl ScriptedTarget
{
    pub fn new() -> Self
    {
        Self {
            open: true,
            baselines: VecDeque::from([Reply::ct(BASELINE_CT)]),
            trials: VecDeque::new(),
            sent: Vec::new(),
            pending: VecDeque::new(),
            awaiting_baseline: false,
            starts: 0,
            stop_after: None,
        }
    }

    pub fn closed() -> Self
    {
        let mut target = Self::new();
        target.open = false;
        target
    }

    pub fn baselines<I>(mut self, replies: I) -> Self
        where I: IntoIterator<Item = Reply>
    {
        self.baselines = replies.into_iter().collect();
        self
    }

    pub fn trials<I>(mut self, replies: I) -> Self
        where I: IntoIterator<Item = Reply>
    {
        self.trials = replies.into_iter().collect();
        self
    }

    /// Request a stop once the `n`th `START` (baseline exchanges included) has been answered
    pub fn stop_after(&mut self, n: usize, control: SweepControl)
    {
        self.stop_after = Some((n, control));
    }

    pub fn starts(&self) -> usize
    {
        self.starts
    }

    fn next_baseline(&mut self) -> Reply
    {
        if self.baselines.len() > 1 {
            self.baselines.pop_front().unwrap_or(Reply::Silence)
        }
        else {
            self.baselines.front().cloned().unwrap_or(Reply::Silence)
        }
    }

    fn next_trial(&mut self) -> Reply
    {
        self.trials.pop_front().unwrap_or_else(|| Reply::ct(BASELINE_CT))
    }
}

#[async_trait]
impl TargetLink for ScriptedTarget
{
    fn is_open(&self) -> bool
    {
        self.open
    }

    async fn send_line(&mut self, line: &str) -> Result<(), LinkError>
    {
        if !self.open {
            return Err(LinkError::NotOpen);
        }

        self.sent.push(line.to_string());

        if line.starts_with("MODE:") {
            self.awaiting_baseline = true;
            self.pending.push_back(format!("Mode set to {}", &line[5..]));
        }
        else if line == "START" {
            self.starts += 1;

            let reply = if self.awaiting_baseline {
                self.awaiting_baseline = false;
                self.next_baseline()
            }
            else {
                self.next_trial()
            };
            self.pending.extend(reply.lines());

            if let Some((n, control)) = &self.stop_after {
                if self.starts == *n {
                    control.request_stop();
                }
            }
        }

        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError>
    {
        if !self.open {
            return Err(LinkError::NotOpen);
        }

        match self.pending.pop_front() {
            Some(line) => Ok(Some(line)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            },
        }
    }

    async fn clear_input(&mut self) -> Result<(), LinkError>
    {
        self.pending.clear();
        Ok(())
    }
}
