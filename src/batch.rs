//! Conversion batch programming.
//!
//! A unit converts at most `slots` channels per batch. Larger groups are
//! converted in several batches, each loaded into the slot registers and
//! started through the PDB pre-triggers.
use fugit::NanosDurationU32;
use pdb::{Arm, ClockConfig, TriggerProgram};

use crate::{
    adc::Inner,
    config::{CompletionMode, GroupConfig, GroupId, TriggerKind, UnitId},
    design_parameters::SLOTS_PER_SUB_UNIT,
    peripheral::{
        AdcRegisters, DmaManager, ErrorSink, SlotControl, TransferDescriptor,
    },
};

/// Number of channels converted by the batch starting at `start`.
pub(crate) fn batch_len(slots: usize, channels: usize, start: usize) -> usize {
    slots.min(channels.saturating_sub(start))
}

/// Derive pre-trigger enables, delays and chaining for the batch of `count`
/// channels starting at `start`.
///
/// Slot `i` is served by pre-trigger `i % 8` of PDB channel `i / 8`. With
/// distributed delays every pre-trigger fires on its own delay. Otherwise the
/// first slot fires on the base delay and the others are chained back-to-back.
pub(crate) fn derive_program(
    group: &GroupConfig,
    clock: &ClockConfig,
    start: usize,
    count: usize,
) -> TriggerProgram {
    // Delays are range checked by the configuration validation.
    let ticks = |delay: u32| {
        clock
            .ticks(NanosDurationU32::from_ticks(delay))
            .unwrap_or(u16::MAX)
    };
    let mut program = TriggerProgram::default();
    for slot in 0..count {
        let channel = &mut program.channels[slot / SLOTS_PER_SUB_UNIT];
        let pretrigger = slot % SLOTS_PER_SUB_UNIT;
        let bit = 1 << pretrigger;
        channel.enable |= bit;
        channel.output |= bit;
        if let Some(delay) = group.distributed_delays.get(start + slot) {
            channel.delays[pretrigger] = ticks(*delay);
        } else if slot == 0 {
            channel.delays[pretrigger] = ticks(group.base_delay);
        } else {
            channel.back_to_back |= bit;
        }
    }
    program.modulus = program.longest_delay();
    program
}

impl<A, P, D, E> Inner<'_, A, P, D, E>
where
    A: AdcRegisters,
    P: pdb::Registers,
    D: DmaManager,
    E: ErrorSink,
{
    /// Load a batch into the slots, prepare its transfer and arm the trigger.
    ///
    /// Status fields are left to the caller.
    pub(crate) fn program_batch(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
        start: usize,
        count: usize,
        arm: Arm,
    ) {
        let config = self.config;
        let unit_config = &config.units[unit_id];
        let group = &config.groups[group_id];
        let interrupt = unit_config.completion == CompletionMode::Interrupt;

        let unit = &mut self.units[unit_id];
        for slot in 0..unit_config.slots {
            let control = if slot < count {
                let channel = group.channels[start + slot] as usize;
                SlotControl::select(
                    unit_config.channels[channel].input,
                    interrupt && slot + 1 == count,
                )
            } else {
                SlotControl::disabled()
            };
            unit.adc.write_slot(slot, control);
        }

        if let Some(channel) = unit_config.dma_channel {
            if !interrupt {
                let descriptor =
                    self.descriptor(unit_id, group_id, start, count);
                self.dma.configure_transfer(unit_id, channel, &descriptor);
                self.dma.enable_request(channel);
            }
        }

        let program =
            derive_program(group, &unit_config.clock, start, count);
        let unit = &mut self.units[unit_id];
        unit.pdb.program(&program, arm);
        unit.status.snapshot = Some(unit.pdb.snapshot());
        log::debug!(
            "Unit {unit_id}: group {group_id} batch {start}..{end} ({arm:?})",
            end = start + count
        );
    }

    fn descriptor(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
        start: usize,
        count: usize,
    ) -> TransferDescriptor {
        let unit = &mut self.units[unit_id];
        let source = unit.adc.result_address(0);
        let source_offset = if count > 1 {
            (unit.adc.result_address(1) as isize - source as isize) as i16
        } else {
            0
        };
        let (destination, destination_offset) =
            self.destination(unit_id, group_id, start);
        TransferDescriptor {
            source,
            source_offset,
            destination,
            destination_offset,
            iterations: count as u16,
            chain_to: None,
        }
    }

    /// DMA destination of the batch starting at `start`, and the address
    /// increment per channel.
    fn destination(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
        start: usize,
    ) -> (usize, i16) {
        let config = self.config;
        let group = &config.groups[group_id];
        if group.limit_check {
            return (self.units[unit_id].status.staging_address(), 2);
        }
        let status = &self.groups[group_id];
        let index = status.result_offset(group, start, status.result_index);
        let address = status
            .buffer
            .as_ref()
            .map(|buffer| buffer.address(index))
            .unwrap_or(0);
        (address, (2 * group.samples) as i16)
    }

    /// Re-enable the DMA request for the first batch of the next sample.
    pub(crate) fn rearm_dma(&mut self, unit_id: UnitId, group_id: GroupId) {
        let config = self.config;
        let unit_config = &config.units[unit_id];
        if let (CompletionMode::Dma, Some(channel)) =
            (unit_config.completion, unit_config.dma_channel)
        {
            let start = self.groups[group_id].current_channel;
            let (address, _) = self.destination(unit_id, group_id, start);
            self.dma.set_destination_address(channel, address);
            self.dma.enable_request(channel);
        }
    }

    /// Whether the trigger can run continuously without per-sample restarts.
    fn can_free_run(&self, unit_id: UnitId, group: &GroupConfig) -> bool {
        let unit = &self.config.units[unit_id];
        unit.completion == CompletionMode::Dma
            && group.mode == crate::config::ConversionMode::Continuous
            && group.trigger == TriggerKind::Software
            && group.channel_count() <= unit.slots
            && group.samples == 1
            && !group.limit_check
            && !group.double_buffered
    }

    /// Program the first batch of a group that just became active.
    pub(crate) fn start_group(&mut self, unit_id: UnitId, group_id: GroupId) {
        let config = self.config;
        let group = &config.groups[group_id];
        let slots = config.units[unit_id].slots;
        let free_running = self.can_free_run(unit_id, group);

        self.groups[group_id].current_channel = 0;
        let unit = &mut self.units[unit_id];
        unit.status.free_running = free_running;
        // The previous group may have left the counter free running.
        if unit.pdb.is_continuous() != free_running {
            unit.pdb.set_continuous(free_running);
        }
        let count = batch_len(slots, group.channel_count(), 0);
        self.program_batch(unit_id, group_id, 0, count, group.arm());
        log::debug!("Unit {unit_id}: group {group_id} started");
    }

    /// Start the next sample of the active group.
    ///
    /// Single batch groups keep their loaded program and are only re-triggered.
    pub(crate) fn restart_sample(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
    ) {
        let config = self.config;
        let group = &config.groups[group_id];
        let slots = config.units[unit_id].slots;
        self.groups[group_id].current_channel = 0;

        if self.units[unit_id].status.free_running {
            self.rearm_dma(unit_id, group_id);
            return;
        }

        let count = batch_len(slots, group.channel_count(), 0);
        if count < group.channel_count() {
            self.program_batch(unit_id, group_id, 0, count, group.arm());
            return;
        }

        self.rearm_dma(unit_id, group_id);
        if group.trigger == TriggerKind::Software {
            if let Err(err) = self.units[unit_id].pdb.start_software() {
                log::debug!("Unit {unit_id}: reprogramming after {err}");
                self.program_batch(unit_id, group_id, 0, count, Arm::Software);
            }
        }
    }
}
