#![cfg_attr(not(test), no_std)]
//! Programmable delay block (PDB) driver.
//!
//! The PDB is the pre-trigger timer in front of an ADC. After a start event (a
//! software trigger or a selected hardware trigger input) its counter runs up
//! to the modulus value and every enabled pre-trigger fires once its delay
//! register matches the counter. A pre-trigger either fires on its own delay
//! or, in back-to-back mode, when the conversion started by the previous
//! pre-trigger completes.
//!
//! Each PDB channel drives one ADC sub-unit with [PRETRIGGERS] pre-triggers,
//! one per ADC conversion slot.

use arbitrary_int::u4;
use bitbybit::{bitenum, bitfield};
use serde::{Deserialize, Serialize};

/// Number of PDB channels (ADC sub-units) per PDB instance.
pub const CHANNELS: usize = 2;

/// Number of pre-triggers (and hence ADC slots) per PDB channel.
pub const PRETRIGGERS: usize = 8;

#[bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum Multiplier {
    #[default]
    One = 0,
    Ten = 1,
    Twenty = 2,
    Forty = 3,
}

impl Multiplier {
    pub fn factor(&self) -> u32 {
        match self {
            Self::One => 1,
            Self::Ten => 10,
            Self::Twenty => 20,
            Self::Forty => 40,
        }
    }
}

#[bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum Prescaler {
    #[default]
    Div1 = 0,
    Div2 = 1,
    Div4 = 2,
    Div8 = 3,
    Div16 = 4,
    Div32 = 5,
    Div64 = 6,
    Div128 = 7,
}

impl Prescaler {
    pub fn divider(&self) -> u32 {
        1 << (*self as u32)
    }
}

/// When written delay and modulus values take effect after `LDOK` is set.
#[bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Default)]
pub enum LoadMode {
    #[default]
    Immediate = 0,
    Modulus = 1,
    Trigger = 2,
    ModulusOrTrigger = 3,
}

/// Status and control register.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Sc {
    /// Load OK. Set to latch delay and modulus registers, cleared by hardware
    /// once loaded.
    #[bit(0, rw)]
    pub ldok: bool,
    /// Continuous mode: restart the counter at modulus.
    #[bit(1, rw)]
    pub cont: bool,
    #[bits(2..=3, rw)]
    pub mult: Multiplier,
    #[bit(5, rw)]
    pub pdbie: bool,
    #[bit(6, rw)]
    pub pdbif: bool,
    #[bit(7, rw)]
    pub pdben: bool,
    /// Trigger input select.
    #[bits(8..=11, rw)]
    pub trgsel: u4,
    #[bits(12..=14, rw)]
    pub prescaler: Prescaler,
    #[bit(15, rw)]
    pub dmaen: bool,
    /// Software trigger. Resets and starts the counter, self-clearing.
    #[bit(16, rw)]
    pub swtrig: bool,
    /// Sequence error interrupt enable.
    #[bit(17, rw)]
    pub pdbeie: bool,
    #[bits(18..=19, rw)]
    pub ldmod: LoadMode,
}

/// Channel control register. One bit per pre-trigger in each field.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct ChannelControl {
    #[bits(0..=7, rw)]
    pub enable: u8,
    /// Trigger output select: fire on the delay match instead of immediately.
    #[bits(8..=15, rw)]
    pub output: u8,
    #[bits(16..=23, rw)]
    pub back_to_back: u8,
}

/// Channel status register. Write 1 to clear.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct ChannelStatus {
    /// Sequence error: a pre-trigger fired before the previous conversion on
    /// its slot completed.
    #[bits(0..=7, rw)]
    pub error: u8,
    #[bits(16..=23, rw)]
    pub flags: u8,
}

/// Register file of one PDB instance.
pub trait Registers {
    fn sc(&self) -> Sc;
    fn write_sc(&mut self, sc: Sc);
    fn modulus(&self) -> u16;
    fn write_modulus(&mut self, ticks: u16);
    fn channel_control(&self, channel: usize) -> ChannelControl;
    fn write_channel_control(
        &mut self,
        channel: usize,
        control: ChannelControl,
    );
    fn channel_status(&self, channel: usize) -> ChannelStatus;
    fn write_channel_status(&mut self, channel: usize, status: ChannelStatus);
    fn delay(&self, channel: usize, pretrigger: usize) -> u16;
    fn write_delay(&mut self, channel: usize, pretrigger: usize, ticks: u16);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Delay load pending")]
    LoadPending,
    #[error("PDB disabled")]
    Disabled,
    #[error("Delay of {0} ns out of counter range")]
    DelayRange(u32),
}

/// Selected trigger input. Input `0xf` is the software trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSource(pub u8);

impl TriggerSource {
    pub const SOFTWARE: Self = Self(0x0f);

    pub fn bits(self) -> u4 {
        u4::new(self.0 & 0x0f)
    }
}

impl Default for TriggerSource {
    fn default() -> Self {
        Self::SOFTWARE
    }
}

/// How a freshly loaded program gets started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arm {
    /// Select the software trigger and fire it.
    Software,
    /// Select the given hardware trigger input and wait for it.
    Hardware(TriggerSource),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// PDB input clock (bus clock) in Hz.
    pub source_hz: u32,
    pub prescaler: Prescaler,
    pub multiplier: Multiplier,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            source_hz: 48_000_000,
            prescaler: Prescaler::Div1,
            multiplier: Multiplier::One,
        }
    }
}

impl ClockConfig {
    /// Counter tick rate after prescaling.
    pub fn tick_rate(&self) -> fugit::HertzU32 {
        fugit::HertzU32::from_raw(
            self.source_hz
                / (self.prescaler.divider() * self.multiplier.factor()),
        )
    }

    /// Convert a delay into counter ticks.
    pub fn ticks(&self, delay: fugit::NanosDurationU32) -> Result<u16, Error> {
        let ticks = delay.ticks() as u64 * self.tick_rate().raw() as u64
            / 1_000_000_000;
        u16::try_from(ticks).map_err(|_| Error::DelayRange(delay.ticks()))
    }
}

/// Pre-trigger settings of one PDB channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelProgram {
    pub enable: u8,
    pub output: u8,
    pub back_to_back: u8,
    pub delays: [u16; PRETRIGGERS],
}

/// Delay and chaining values for one batch of conversions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerProgram {
    pub channels: [ChannelProgram; CHANNELS],
    pub modulus: u16,
}

impl TriggerProgram {
    /// The longest delay of any enabled pre-trigger.
    pub fn longest_delay(&self) -> u16 {
        self.channels
            .iter()
            .flat_map(|ch| {
                ch.delays
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| ch.enable & (1 << i) != 0)
                    .map(|(_, d)| *d)
            })
            .max()
            .unwrap_or(0)
    }

    /// Number of enabled pre-triggers.
    pub fn pretriggers(&self) -> u32 {
        self.channels.iter().map(|ch| ch.enable.count_ones()).sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ChannelSnapshot {
    control: ChannelControl,
    delays: [u16; PRETRIGGERS],
}

/// Register contents of a loaded program, used to recover from sequence errors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot {
    sc: Sc,
    modulus: u16,
    channels: [ChannelSnapshot; CHANNELS],
}

pub struct Pdb<R> {
    regs: R,
    clock: ClockConfig,
}

impl<R: Registers> Pdb<R> {
    pub fn new(regs: R) -> Self {
        Self {
            regs,
            clock: ClockConfig::default(),
        }
    }

    pub fn clock(&self) -> &ClockConfig {
        &self.clock
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn free(self) -> R {
        self.regs
    }

    /// Reset the peripheral and apply the counter clock configuration.
    ///
    /// The PDB is left enabled with the software trigger selected and no
    /// pre-trigger enabled.
    pub fn init(&mut self, clock: ClockConfig) {
        self.stop();
        self.clock = clock;
        self.regs.write_sc(
            Sc::default()
                .with_prescaler(clock.prescaler)
                .with_mult(clock.multiplier)
                .with_trgsel(TriggerSource::SOFTWARE.bits())
                .with_ldmod(LoadMode::Immediate)
                .with_pdbeie(true)
                .with_pdben(true),
        );
        log::info!(
            "PDB initialized: {} Hz tick rate",
            self.clock.tick_rate().raw()
        );
    }

    /// Write a trigger program, request the load and arm the trigger.
    pub fn program(&mut self, program: &TriggerProgram, arm: Arm) {
        for (index, channel) in program.channels.iter().enumerate() {
            for (pretrigger, delay) in channel.delays.iter().enumerate() {
                if channel.enable & (1 << pretrigger) != 0 {
                    self.regs.write_delay(index, pretrigger, *delay);
                }
            }
            self.regs.write_channel_control(
                index,
                ChannelControl::default()
                    .with_enable(channel.enable)
                    .with_output(channel.output)
                    .with_back_to_back(channel.back_to_back),
            );
        }
        self.regs.write_modulus(program.modulus);

        let source = match arm {
            Arm::Software => TriggerSource::SOFTWARE,
            Arm::Hardware(source) => source,
        };
        let sc = self
            .regs
            .sc()
            .with_pdben(true)
            .with_trgsel(source.bits())
            .with_swtrig(false)
            .with_ldok(true);
        self.regs.write_sc(sc);

        if arm == Arm::Software {
            self.software_trigger();
        }
    }

    /// Re-fire the software trigger with the delays already loaded.
    ///
    /// Fails if the load handshake of the previous [Pdb::program] has not
    /// completed, in which case the trigger would run with stale delays.
    pub fn start_software(&mut self) -> Result<(), Error> {
        let sc = self.regs.sc();
        if !sc.pdben() {
            return Err(Error::Disabled);
        }
        if sc.ldok() {
            return Err(Error::LoadPending);
        }
        self.regs
            .write_sc(sc.with_trgsel(TriggerSource::SOFTWARE.bits()));
        self.software_trigger();
        Ok(())
    }

    fn software_trigger(&mut self) {
        // Writing zero to LDOK has no effect.
        let sc = self.regs.sc().with_ldok(false).with_swtrig(true);
        self.regs.write_sc(sc);
    }

    /// Disable the peripheral and clear pre-trigger enables and latched status.
    pub fn stop(&mut self) {
        let sc = self.regs.sc();
        self.regs.write_sc(
            sc.with_pdben(false)
                .with_cont(false)
                .with_swtrig(false)
                .with_ldok(false)
                .with_pdbif(false),
        );
        for channel in 0..CHANNELS {
            self.regs
                .write_channel_control(channel, ChannelControl::default());
            let status = self.regs.channel_status(channel);
            self.regs.write_channel_status(channel, status);
        }
    }

    /// Let the counter restart at modulus without further triggers.
    pub fn set_continuous(&mut self, continuous: bool) {
        let sc = self.regs.sc().with_cont(continuous);
        self.regs.write_sc(sc);
    }

    pub fn is_continuous(&self) -> bool {
        self.regs.sc().cont()
    }

    pub fn is_enabled(&self) -> bool {
        self.regs.sc().pdben()
    }

    /// Sequence error flags, eight bits per channel.
    pub fn sequence_errors(&self) -> u16 {
        (0..CHANNELS).fold(0, |errors, channel| {
            errors
                | (self.regs.channel_status(channel).error() as u16)
                    << (channel * PRETRIGGERS)
        })
    }

    pub fn clear_sequence_errors(&mut self) {
        for channel in 0..CHANNELS {
            let error = self.regs.channel_status(channel).error();
            if error != 0 {
                self.regs.write_channel_status(
                    channel,
                    ChannelStatus::default().with_error(error),
                );
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut channels = [ChannelSnapshot::default(); CHANNELS];
        for (index, channel) in channels.iter_mut().enumerate() {
            channel.control = self.regs.channel_control(index);
            for (pretrigger, delay) in channel.delays.iter_mut().enumerate() {
                *delay = self.regs.delay(index, pretrigger);
            }
        }
        Snapshot {
            sc: self.regs.sc(),
            modulus: self.regs.modulus(),
            channels,
        }
    }

    /// Disable the peripheral and load a previously captured register snapshot.
    ///
    /// The trigger is not fired.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        self.stop();
        for (index, channel) in snapshot.channels.iter().enumerate() {
            for (pretrigger, delay) in channel.delays.iter().enumerate() {
                self.regs.write_delay(index, pretrigger, *delay);
            }
            self.regs.write_channel_control(index, channel.control);
        }
        self.regs.write_modulus(snapshot.modulus);
        self.regs.write_sc(
            snapshot
                .sc
                .with_pdben(true)
                .with_swtrig(false)
                .with_ldok(true),
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tick_rate() {
        let clock = ClockConfig {
            source_hz: 48_000_000,
            prescaler: Prescaler::Div4,
            multiplier: Multiplier::Ten,
        };
        assert_eq!(clock.tick_rate().raw(), 1_200_000);
        assert_eq!(clock.ticks(fugit::NanosDurationU32::micros(10)), Ok(12));
    }

    #[test]
    fn delay_range() {
        let clock = ClockConfig::default();
        assert_eq!(
            clock.ticks(fugit::NanosDurationU32::millis(10)),
            Err(Error::DelayRange(10_000_000))
        );
    }

    #[test]
    fn longest_delay_ignores_disabled() {
        let mut program = TriggerProgram::default();
        program.channels[0].enable = 0b11;
        program.channels[0].delays[0] = 10;
        program.channels[0].delays[1] = 30;
        program.channels[0].delays[5] = 500;
        program.channels[1].enable = 0b1;
        program.channels[1].delays[0] = 20;
        assert_eq!(program.longest_delay(), 30);
        assert_eq!(program.pretriggers(), 3);
    }
}
