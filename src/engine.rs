//! The sweep engine
//!
//! # Purpose
//! [`SweepEngine`] owns a [`PulseDevice`] and a [`TargetLink`] for the duration of a sweep and
//! walks the grid described by a [`SweepConfig`]. At every point it disarms the device, programs
//! the point's parameters, re-arms, and runs a fixed number of trials against the target, each
//! trial being one [`exchange`](protocol::exchange). Trials are classified against a baseline
//! ciphertext read from the unperturbed target before the sweep starts.
//!
//! Everything the engine observes is reported as a [`SweepEvent`] over an unbounded channel, and
//! the final [`SweepEvent::Finished`] is always the last event of a run. Per-trial and per-point
//! failures never end a sweep; they are counted or reported as an [`Anomaly`] and the sweep carries
//! on with the next trial or point.
//!
//! # Stopping
//! [`SweepControl::request_stop`] is checked before every point and before every trial. A trial
//! already in flight is allowed to finish, so a stop takes effect within one exchange timeout. The
//! trials completed at the point being stopped are still reported.
//!
//! # Device Safety
//! The device is disarmed before every point is reconfigured and again when the sweep ends,
//! however it ends.
//!
//! # Cancel Safety
//! [`SweepEngine::run`] is **not** cancel safe. Dropping it mid-sweep can leave the device armed.
//! Use [`SweepControl::request_stop`] to end a sweep early.

use std::{
    sync::{
        atomic::{ AtomicBool, Ordering },
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{ self, UnboundedReceiver, UnboundedSender },
    task::JoinHandle,
    time::sleep,
};
use tracing::{ Instrument, Level };
use crate::{
    classify::{ classify, TrialOutcome },
    cmd::{ DeviceParam, TargetCmd },
    config::SweepConfig,
    device::PulseDevice,
    error::DeviceError,
    grid::{ GridPoint, SweepGrid },
    link::TargetLink,
    protocol::{ self, ExchangeResult, CIPHERTEXT_KEY, EXCHANGE_TIMEOUT },
    results::{ Anomaly, PointResult, Progress, SweepEvent, SweepStatus, SweepSummary, TrialCounts },
};

/// Summary reason given when a sweep is started without a usable target link
pub const NO_LINK_REASON: &str = "No target serial connection.";

const ARM_ATTEMPTS: u32 = 3;
const DISARM_ATTEMPTS: u32 = 3;

/// Settling times and retry backoffs used while sweeping
///
/// The defaults suit a ChipSHOUTER style glitcher and a target that answers within a few hundred
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTimings
{
    /// Wait after selecting the target mode before reading the baseline
    pub mode_settle: Duration,
    /// Wait after clearing device faults
    pub fault_clear_settle: Duration,
    /// Wait after arming
    pub arm_settle: Duration,
    /// Wait between failed arm attempts
    pub arm_retry: Duration,
    /// Wait after disarming
    pub disarm_settle: Duration,
    /// Wait between failed disarm attempts
    pub disarm_retry: Duration,
    /// Wait after programming a point's parameters
    pub param_settle: Duration,
    /// Wait for the capacitor bank to charge after arming a point
    pub charge_settle: Duration,
    /// Wait after reporting a point
    pub point_gap: Duration,
    /// Time budget of one target exchange
    pub exchange_timeout: Duration,
}

impl Default for SweepTimings
{
    fn default() -> Self
    {
        Self {
            mode_settle: Duration::from_millis(500),
            fault_clear_settle: Duration::from_millis(100),
            arm_settle: Duration::from_millis(200),
            arm_retry: Duration::from_millis(300),
            disarm_settle: Duration::from_millis(150),
            disarm_retry: Duration::from_millis(100),
            param_settle: Duration::from_millis(50),
            charge_settle: Duration::from_secs(1),
            point_gap: Duration::from_millis(50),
            exchange_timeout: EXCHANGE_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct ControlFlags
{
    stop: AtomicBool,
    running: AtomicBool,
}

/// A handle for stopping a sweep and observing whether it is running
///
/// Cheap to clone; every clone controls the same engine.
#[derive(Debug, Clone, Default)]
pub struct SweepControl
{
    flags: Arc<ControlFlags>,
}

impl SweepControl
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Ask the sweep to stop at its next point or trial
    ///
    /// A request made before the sweep task gets to run still applies to that sweep. The request
    /// is consumed when the sweep finishes.
    pub fn request_stop(&self)
    {
        self.flags.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool
    {
        self.flags.stop.load(Ordering::SeqCst)
    }

    /// Whether a sweep currently owns the device and the link
    ///
    /// Callers polling the device or target on their own must wait for this to turn false.
    pub fn is_running(&self) -> bool
    {
        self.flags.running.load(Ordering::SeqCst)
    }

    fn begin(&self)
    {
        self.flags.running.store(true, Ordering::SeqCst);
    }

    fn finish(&self)
    {
        self.flags.stop.store(false, Ordering::SeqCst);
        self.flags.running.store(false, Ordering::SeqCst);
    }
}

/// Mutable state of one run
#[derive(Debug, Default)]
struct RunState
{
    baseline: Option<String>,
    reset_count: u32,
    delay_warned: bool,
    points_visited: usize,
    stopped_early: bool,
}

/// Drives a fault injection sweep
pub struct SweepEngine<D, L>
{
    device: D,
    link: L,
    config: SweepConfig,
    timings: SweepTimings,
    control: SweepControl,
    /// `None` once the event stream has been closed
    events: Option<UnboundedSender<SweepEvent>>,
    results: Vec<PointResult>,
}

impl <D, L> SweepEngine<D, L>
    where D: PulseDevice,
          L: TargetLink
{
    /// Construct an engine and the receiving end of its event stream
    pub fn new(device: D, link: L, config: SweepConfig) -> (Self, UnboundedReceiver<SweepEvent>)
    {
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = Self {
            device: device,
            link: link,
            config: config,
            timings: SweepTimings::default(),
            control: SweepControl::default(),
            events: Some(events),
            results: Vec::new(),
        };

        (engine, receiver)
    }

    pub fn with_timings(mut self, timings: SweepTimings) -> Self
    {
        self.timings = timings;
        self
    }

    /// Share an existing control handle instead of the engine's own
    pub fn with_control(mut self, control: SweepControl) -> Self
    {
        self.control = control;
        self
    }

    /// A handle for stopping the sweep from another task
    pub fn control(&self) -> SweepControl
    {
        self.control.clone()
    }

    pub fn config(&self) -> &SweepConfig
    {
        &self.config
    }

    /// Results of the last run, in grid order
    pub fn results(&self) -> &[PointResult]
    {
        &self.results
    }

    pub fn device(&self) -> &D
    {
        &self.device
    }

    pub fn link(&self) -> &L
    {
        &self.link
    }

    /// Give back the device, the link and the results of the last run
    pub fn into_parts(self) -> (D, L, Vec<PointResult>)
    {
        (self.device, self.link, self.results)
    }

    /// Run on a new tokio task, handing the engine back when the sweep is over
    ///
    /// The event stream is closed once `Finished` has been sent, so a receiver loop ends on its
    /// own. The engine handed back reports no further events.
    pub fn spawn(mut self) -> JoinHandle<Self>
        where D: 'static,
              L: 'static
    {
        tokio::spawn(async move {
            self.run().await;
            self.events = None;
            self
        })
    }

    /// Run one complete sweep
    ///
    /// Results of a previous run are discarded. The outcome is reported through the event stream
    /// and [`results`](SweepEngine::results).
    pub async fn run(&mut self)
    {
        self.results.clear();

        if !self.link.is_open() {
            let summary = SweepSummary::aborted(NO_LINK_REASON);
            tracing::error!("{}", summary);
            self.emit(SweepEvent::Finished(summary));
            return;
        }

        self.control.begin();
        let grid = SweepGrid::from_config(&self.config);
        let mut state = RunState::default();
        let span = tracing::info_span!("sweep", points = grid.len());

        async {
            self.sweep(&grid, &mut state).await;
            self.safe_disarm().await;
        }
        .instrument(span)
        .await;

        let status = if state.stopped_early { SweepStatus::Stopped } else { SweepStatus::Complete };
        let summary = SweepSummary::from_results(status, &self.results, state.points_visited, grid.len());

        tracing::info!("{}", summary);
        self.control.finish();
        self.emit(SweepEvent::Finished(summary));
    }

    async fn sweep(&mut self, grid: &SweepGrid, state: &mut RunState)
    {
        self.log(
            Level::INFO,
            format!("Sweep grid: {}, {} pulses/point", grid, self.config.pulses_per_point()),
        );

        self.configure_fixed().await;

        match self.device.clear_faults().await {
            Ok(()) => {
                sleep(self.timings.fault_clear_settle).await;
                self.log(Level::INFO, "Faults cleared".to_string());
            },
            Err(err) => tracing::debug!(error = %err, "initial fault clear failed"),
        }

        state.baseline = self.setup_target_mode().await;

        if state.baseline.is_none() && !self.control.is_stop_requested() {
            self.anomaly(Anomaly::NoBaseline);
        }

        let total_points = grid.len();

        for (index, point) in grid.points().enumerate() {
            if self.control.is_stop_requested() {
                state.stopped_early = true;
                break;
            }

            state.points_visited = index + 1;
            self.run_point(point, index + 1, total_points, state).await;
        }
    }

    /// Program the parameters which stay the same for the whole sweep
    async fn configure_fixed(&mut self)
    {
        let params = [
            DeviceParam::PulseRepeat(self.config.pulse_repeat()),
            DeviceParam::Deadtime(self.config.deadtime()),
            DeviceParam::Mute(true),
        ];

        for param in params {
            if let Err(err) = self.device.set(param).await {
                self.log(Level::WARN, format!("Fixed param config error: {}: {}", param, err));
            }
        }
    }

    async fn run_point(&mut self, point: GridPoint, index: usize, total_points: usize, state: &mut RunState)
    {
        self.check_probe_envelope(point);
        self.safe_disarm().await;

        if let Err(anomaly) = self.configure_point(point, state).await {
            self.anomaly(anomaly);
            return;
        }

        if let Err(err) = self.try_clear_and_arm().await {
            let anomaly = if err.is_reset() {
                Anomaly::DeviceReset { point: point }
            }
            else {
                let faults = self.device.read_faults().await.unwrap_or_default();
                Anomaly::ArmFailed { point: point, faults: faults }
            };

            self.anomaly(anomaly);
            return;
        }

        sleep(self.timings.charge_settle).await;

        let (counts, last_observed) = self.sample(point, state).await;
        let result = PointResult::new(point, counts, state.baseline.clone(), last_observed);
        let progress = Progress {
            index: index,
            total_points: total_points,
            point: point,
            tag: result.tag(),
            counts: counts,
        };

        tracing::info!("{}", progress);
        self.results.push(result.clone());
        self.emit(SweepEvent::Point(result));
        self.emit(SweepEvent::Progress(progress));

        sleep(self.timings.point_gap).await;
    }

    fn check_probe_envelope(&self, point: GridPoint)
    {
        let limits = match self.config.probe() {
            Some(probe) => probe.limits(),
            None => return,
        };

        if !limits.allows(point.voltage, point.pulse_width) {
            let (min, max) = limits.pulse_width_limits(point.voltage);
            self.anomaly(Anomaly::OutsideProbeEnvelope { point: point, min: min, max: max });
        }
    }

    /// Program a point's voltage, pulse width and, if supported, trigger offset
    async fn configure_point(&mut self, point: GridPoint, state: &mut RunState) -> Result<(), Anomaly>
    {
        let mut params = vec![
            DeviceParam::Voltage(point.voltage),
            DeviceParam::PulseWidth(point.pulse_width),
        ];

        // the device keeps its last offset, so zero is programmed as well
        if self.device.supports_trigger_offset() {
            params.push(DeviceParam::TriggerOffset(point.delay));
        }
        else if !point.delay.is_zero() && !state.delay_warned {
            state.delay_warned = true;
            self.anomaly(Anomaly::DelayUnsupported);
        }

        for param in params {
            if let Err(err) = self.device.set(param).await {
                return Err(match err {
                    DeviceError::Reset => Anomaly::DeviceReset { point: point },
                    err => Anomaly::ConfigureFailed {
                        point: point,
                        param: param.name(),
                        reason: err.to_string(),
                    },
                });
            }
        }

        sleep(self.timings.param_settle).await;
        Ok(())
    }

    /// Run the trials of one point
    async fn sample(&mut self, point: GridPoint, state: &mut RunState) -> (TrialCounts, Option<String>)
    {
        let mut counts = TrialCounts::default();
        let mut last_observed = None;
        let interval = self.config.pulse_interval();

        for trial in 1..=self.config.pulses_per_point() {
            if self.control.is_stop_requested() {
                state.stopped_early = true;
                break;
            }

            if trial > 1 && !interval.is_zero() {
                sleep(interval).await;
            }

            match protocol::exchange(&mut self.link, self.timings.exchange_timeout).await {
                ExchangeResult::CommError => {
                    counts.record(TrialOutcome::CommError);
                    self.anomaly(Anomaly::CommError { point: point, trial: trial });
                },
                ExchangeResult::Reset => {
                    counts.record(TrialOutcome::Reset);
                    state.reset_count += 1;
                    self.anomaly(Anomaly::TargetReset { count: state.reset_count, point: point, trial: trial });

                    match self.setup_target_mode().await {
                        Some(baseline) => {
                            self.log(Level::INFO, format!("New baseline CT after reset: {}", baseline));
                            state.baseline = Some(baseline);
                        },
                        None => self.anomaly(Anomaly::RebaselineFailed),
                    }

                    if self.try_clear_and_arm().await.is_err() {
                        break;
                    }
                },
                ExchangeResult::Data(response) => {
                    let observed = response.get(CIPHERTEXT_KEY).unwrap_or("");
                    counts.record(classify(state.baseline.as_deref(), observed));

                    if !observed.is_empty() {
                        last_observed = Some(observed.to_string());
                    }
                },
            }
        }

        (counts, last_observed)
    }

    /// Select the target mode and read a baseline ciphertext
    async fn setup_target_mode(&mut self) -> Option<String>
    {
        let mode = self.config.target_mode().to_string();

        if let Err(err) = protocol::select_mode(&mut self.link, &mode, self.timings.mode_settle).await {
            self.log(Level::WARN, format!("Target mode setup error: {}", err));
            return None;
        }

        self.log(Level::INFO, format!("Target {} set", TargetCmd::SelectMode(mode)));

        let result = protocol::exchange(&mut self.link, self.timings.exchange_timeout).await;
        let baseline = result.ciphertext()?.to_string();

        self.log(Level::INFO, format!("Baseline CT: {}", baseline));
        Some(baseline)
    }

    /// Clear faults and arm, retrying a few times
    ///
    /// A device reset ends the attempts immediately.
    async fn try_clear_and_arm(&mut self) -> Result<(), DeviceError>
    {
        let mut attempt = 1;

        loop {
            let err = match self.clear_and_arm().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if err.is_reset() {
                self.log(Level::WARN, "Pulse device reset during arm".to_string());
                return Err(err);
            }

            if attempt >= ARM_ATTEMPTS {
                self.log(Level::WARN, format!("Arm failed after {} attempts: {}", ARM_ATTEMPTS, err));
                return Err(err);
            }

            self.log(Level::WARN, format!("Arm attempt {} failed: {}, retrying...", attempt, err));
            sleep(self.timings.arm_retry).await;
            attempt += 1;
        }
    }

    async fn clear_and_arm(&mut self) -> Result<(), DeviceError>
    {
        self.device.clear_faults().await?;
        sleep(self.timings.fault_clear_settle).await;
        self.device.arm().await?;
        sleep(self.timings.arm_settle).await;
        Ok(())
    }

    /// Disarm, retrying a few times
    async fn safe_disarm(&mut self)
    {
        for attempt in 1..=DISARM_ATTEMPTS {
            match self.device.disarm().await {
                Ok(()) => {
                    sleep(self.timings.disarm_settle).await;
                    return;
                },
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "disarm failed");
                    sleep(self.timings.disarm_retry).await;
                },
            }
        }

        self.log(Level::ERROR, format!("Could not disarm pulse device after {} attempts", DISARM_ATTEMPTS));
    }

    fn emit(&self, event: SweepEvent)
    {
        // a listener which went away does not stop the sweep
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn log(&self, level: Level, message: String)
    {
        if level == Level::ERROR {
            tracing::error!("{}", message);
        }
        else if level == Level::WARN {
            tracing::warn!("{}", message);
        }
        else {
            tracing::info!("{}", message);
        }

        self.emit(SweepEvent::Log { level: level, message: message });
    }

    fn anomaly(&self, anomaly: Anomaly)
    {
        tracing::warn!("{}", anomaly);
        self.emit(SweepEvent::Anomaly(anomaly));
    }
}
