//! Instrument layer.
//!
//! [`capabilities`] defines one trait per device role. The remaining modules
//! are thin drivers for the instruments on the bench, plus [`mock`] for tests
//! and dry runs.

pub mod capabilities;
pub mod mock;
pub mod muquans;
pub mod red_pitaya;
pub mod rigol_sa;
pub mod signal_generator;
pub mod tektronix_afg;
pub mod wavemeter;
pub mod windfreak;

pub use signal_generator::{build_signal_generator, SignalGeneratorChoice, VoltageRange};
