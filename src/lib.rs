#![cfg_attr(not(test), no_std)]
//! ADC group conversion scheduler.
//!
//! Groups of analog channels are converted on one or two ADC units. Each unit
//! has a limited file of conversion slots started by the pre-triggers of a
//! programmable delay block (PDB). Groups with more channels than slots are
//! converted in several batches. Results are collected either in the
//! conversion-complete interrupt or by the DMA engine.
//!
//! Start requests are queued per unit and served one at a time. Hardware
//! triggered groups can be given priority over software triggered ones.

mod adc;
mod batch;
pub mod config;
pub mod design_parameters;
mod dma;
mod error;
mod interrupt;
pub mod limit;
pub mod peripheral;
mod queue;
mod status;

pub use adc::{Adc, Event, Parts};
pub use config::{Config, GroupId, UnitId};
pub use error::{Error, ErrorId};
pub use peripheral::{AdcRegisters, DmaManager, ErrorSink};
pub use status::{ConversionState, GroupDiagnostics};

#[cfg(test)]
mod testing;
