//! Interfaces of the hardware the scheduler drives or consumes.
//!
//! The scheduler owns one [AdcRegisters] and one [pdb::Registers]
//! implementation per unit. The DMA engine and the error sink are shared
//! collaborators with their own lifecycle; only the narrow descriptor and
//! request-line API below is used.
use arbitrary_int::u6;
use bitbybit::bitfield;

use crate::{config::UnitId, error::ErrorId};

/// Conversion slot control register (`SC1n`).
#[bitfield(u32, default = 0x3f)]
#[derive(Debug, PartialEq)]
pub struct SlotControl {
    /// Input selection. `0x3f` disables the slot.
    #[bits(0..=5, rw)]
    pub input: u6,
    /// Conversion-complete interrupt enable.
    #[bit(6, rw)]
    pub interrupt_enable: bool,
    /// Conversion complete flag. Cleared by reading the result register.
    #[bit(7, r)]
    pub complete: bool,
}

impl SlotControl {
    pub fn disabled() -> Self {
        Self::DEFAULT
    }

    pub fn select(input: u8, interrupt_enable: bool) -> Self {
        Self::DEFAULT
            .with_input(u6::new(input & 0x3f))
            .with_interrupt_enable(interrupt_enable)
    }
}

/// Register file of one ADC unit.
pub trait AdcRegisters {
    fn write_slot(&mut self, slot: usize, control: SlotControl);

    /// Whether the conversion on `slot` completed and its result was not read
    /// yet.
    fn conversion_complete(&self, slot: usize) -> bool;

    /// Read a slot result register. Clears the slot's complete flag.
    fn read_result(&mut self, slot: usize) -> u16;

    /// Bus address of a slot result register, the source of DMA transfers.
    fn result_address(&self, slot: usize) -> usize;

    /// Start conversions from the PDB pre-triggers instead of slot writes.
    fn set_hardware_trigger(&mut self, enable: bool);

    /// Raise a DMA request instead of an interrupt on conversion complete.
    fn set_dma(&mut self, enable: bool);

    fn start_calibration(&mut self);

    /// `None` while calibration runs, else whether it succeeded.
    fn calibration_done(&self) -> Option<bool>;
}

/// One block transfer: `iterations` words from the source to the destination
/// address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub source: usize,
    /// Signed source address increment per word in bytes.
    pub source_offset: i16,
    pub destination: usize,
    /// Signed destination address increment per word in bytes.
    pub destination_offset: i16,
    pub iterations: u16,
    /// Channel started when this transfer completes.
    pub chain_to: Option<u8>,
}

/// The DMA channel and descriptor manager.
pub trait DmaManager {
    fn configure_transfer(
        &mut self,
        unit: UnitId,
        channel: u8,
        descriptor: &TransferDescriptor,
    );
    fn enable_request(&mut self, channel: u8);
    fn disable_request(&mut self, channel: u8);
    fn is_transfer_active(&self, channel: u8) -> bool;
    fn set_destination_address(&mut self, channel: u8, address: usize);
    /// Outstanding iterations of the current transfer.
    fn iteration_count(&self, channel: u8) -> u16;
}

/// Device error reporting.
pub trait ErrorSink {
    fn report_error(&mut self, error: ErrorId, unit: UnitId);
}
