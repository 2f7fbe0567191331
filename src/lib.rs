//! **A**synchronous-Rust **R**emote **C**ontrol for **S**weeping voltage **Glitch**es
//!
//! Drives differential fault analysis sweeps: a pulse device injects a glitch at every point of a
//! (voltage, pulse width, trigger delay) grid while a target board performs a cryptographic
//! operation, and each answer is classified against an unperturbed baseline.
//!
//! The crate does not know how to talk to any particular glitcher. Bring a [`PulseDevice`]
//! implementation and a [`TargetLink`] (usually a [`SerialLink`]), describe the sweep with a
//! [`SweepConfig`], then hand all three to a [`SweepEngine`]:
//!
//! ```no_run
//! # async fn sweep<D: arcs_glitch::PulseDevice + 'static>(device: D) -> Result<(), Box<dyn std::error::Error>> {
//! use arcs_glitch::{ AxisRange, SerialLink, SweepConfig, SweepEngine, SweepEvent };
//!
//! let link = SerialLink::open("/dev/ttyACM0", 115_200)?;
//! let config = SweepConfig::builder()
//!     .voltage_range(AxisRange::new(200, 400, 50))
//!     .pulses_per_point(5)
//!     .build()?;
//!
//! let (engine, mut events) = SweepEngine::new(device, link, config);
//! let control = engine.control();
//! let sweep = engine.spawn();
//!
//! // the stream ends after the sweep's `Finished` event
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SweepEvent::Progress(progress) => println!("{}", progress),
//!         SweepEvent::Finished(summary) => println!("{}", summary),
//!         _ => {},
//!     }
//! }
//!
//! # drop(control);
//! let engine = sweep.await?;
//! println!("{} points reported", engine.results().len());
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod cmd;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod grid;
pub mod link;
pub mod protocol;
pub mod results;
pub mod units;

pub use classify::{ classify, TrialOutcome };
pub use cmd::{ DeviceParam, TargetCmd };
pub use config::{ Axis, AxisRange, SweepConfig, SweepConfigBuilder };
pub use device::{ ProbeLimits, ProbeTip, PulseDevice };
pub use engine::{ SweepControl, SweepEngine, SweepTimings };
pub use error::{ ConfigError, DeviceError, LinkError };
pub use grid::{ GridPoint, SweepGrid };
pub use link::{ SerialLink, TargetLink };
pub use protocol::{ exchange, ExchangeResult, Response, ResponseParser };
pub use results::{ Anomaly, GlitchRate, PointResult, PointTag, Progress, SweepEvent, SweepStatus, SweepSummary, TrialCounts };
pub use units::{ Microsecond, Millisecond, Nanosecond, Volt };
