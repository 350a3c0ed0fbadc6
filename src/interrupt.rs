//! Conversion-complete and sequence-error handling.
use pdb::Arm;

use crate::{
    adc::Inner,
    batch::batch_len,
    config::{
        ConversionMode, GroupId, Notification, TriggerKind, UnitId,
        UnitNotification,
    },
    design_parameters::MAX_SLOTS,
    error::ErrorId,
    limit,
    peripheral::{AdcRegisters, DmaManager, ErrorSink},
    status::ConversionState,
};

/// Work left after a completion event, performed outside the critical section.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Completion {
    None,
    /// The last batch of a sample was converted and committed by the start
    /// request of the given generation.
    SampleDone(UnitId, GroupId, u32),
    /// The unit recovered from a sequence error.
    UnitError(UnitId, UnitNotification),
}

impl<A, P, D, E> Inner<'_, A, P, D, E>
where
    A: AdcRegisters,
    P: pdb::Registers,
    D: DmaManager,
    E: ErrorSink,
{
    /// Read the slot results of the batch in flight.
    pub(crate) fn conversion_complete(
        &mut self,
        unit_id: UnitId,
    ) -> Completion {
        let config = self.config;
        let slots = config.units[unit_id].slots;
        let unit = &mut self.units[unit_id];

        let fired = (0..slots).any(|slot| unit.adc.conversion_complete(slot));
        let active = unit.status.active();
        let Some(group_id) = active.filter(|_| fired) else {
            log::warn!("Unit {unit_id}: spurious conversion complete");
            self.drain(unit_id);
            return Completion::None;
        };

        let group = &config.groups[group_id];
        let start = self.groups[group_id].current_channel;
        let count = batch_len(slots, group.channel_count(), start);
        let mut results = [0; MAX_SLOTS];
        for (slot, result) in results[..count].iter_mut().enumerate() {
            *result = unit.adc.read_result(slot);
        }
        self.complete_batch(unit_id, group_id, Some(&results[..count]))
    }

    /// Read all slot registers, clearing latched complete flags.
    pub(crate) fn drain(&mut self, unit_id: UnitId) {
        let slots = self.config.units[unit_id].slots;
        let adc = &mut self.units[unit_id].adc;
        for slot in 0..slots {
            adc.read_result(slot);
        }
    }

    /// Check and commit the results of a batch and continue the sample.
    ///
    /// `results` is `None` when the transfer already placed the results in the
    /// group buffer.
    pub(crate) fn complete_batch(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
        results: Option<&[u16]>,
    ) -> Completion {
        let config = self.config;
        let unit_config = &config.units[unit_id];
        let group = &config.groups[group_id];
        let status = &mut self.groups[group_id];
        let start = status.current_channel;
        let count = batch_len(unit_config.slots, group.channel_count(), start);

        let passed = !group.limit_check
            || results.unwrap_or(&[]).iter().enumerate().all(|(i, sample)| {
                let channel = group.channels[start + i] as usize;
                let limit = unit_config.channels[channel].limit.as_ref();
                limit::check(limit, *sample)
            });

        if !passed {
            status.limit_check_failed = true;
            status.already_converted_once = true;
            status.current_channel = 0;
            log::warn!("Unit {unit_id}: group {group_id} limit check failed");
            if group.mode == ConversionMode::OneShot {
                self.abort(unit_id);
            } else {
                let count =
                    batch_len(unit_config.slots, group.channel_count(), 0);
                self.program_batch(unit_id, group_id, 0, count, group.arm());
            }
            return Completion::None;
        }

        if group.limit_check {
            status.limit_check_failed = false;
        }
        let base = status.result_offset(group, start, status.result_index);
        if let (Some(results), Some(buffer)) =
            (results, status.buffer.as_mut())
        {
            for (i, sample) in results.iter().enumerate() {
                buffer.write(base + i * group.samples, *sample);
            }
        }
        status.current_channel += count;
        let generation = status.generation;

        if status.current_channel < group.channel_count() {
            let start = status.current_channel;
            let count =
                batch_len(unit_config.slots, group.channel_count(), start);
            self.program_batch(unit_id, group_id, start, count, Arm::Software);
            return Completion::None;
        }
        Completion::SampleDone(unit_id, group_id, generation)
    }

    /// Advance to the next sample after a complete sample set.
    ///
    /// Returns the completion notification to call, if armed.
    pub(crate) fn finish_sample(
        &mut self,
        unit_id: UnitId,
        group_id: GroupId,
        generation: u32,
    ) -> Option<Notification> {
        let config = self.config;
        let group = &config.groups[group_id];
        let unit = &mut self.units[unit_id];
        if unit.status.active() != Some(group_id)
            || self.groups[group_id].generation != generation
        {
            // Stopped or restarted from the extra notification.
            return None;
        }
        let armed = unit.status.armed == Some(group_id);

        let status = &mut self.groups[group_id];
        status.already_converted_once = true;
        status.valid_samples = (status.valid_samples + 1).min(group.samples);
        status.result_index += 1;

        if status.result_index >= group.samples {
            status.result_index = 0;
            status.state = ConversionState::StreamCompleted;
            if armed {
                status.current_channel = 0;
                self.rearm_dma(unit_id, group_id);
            } else if group.stops_on_stream_end() {
                status.hw_trigger_enabled = false;
                self.dequeue_head(unit_id);
                log::debug!(
                    "Unit {unit_id}: group {group_id} stream completed"
                );
            } else {
                if group.double_buffered {
                    status.half ^= 1;
                }
                self.restart_sample(unit_id, group_id);
            }
        } else {
            if status.state == ConversionState::Busy {
                status.state = ConversionState::Completed;
            }
            self.restart_sample(unit_id, group_id);
        }

        self.groups[group_id]
            .notification_armed
            .then_some(group.notification)
            .flatten()
    }

    /// Recover from a pre-trigger sequence error.
    ///
    /// The trigger is restored from the snapshot of the last programmed batch
    /// and the batch in flight is restarted.
    pub(crate) fn sequence_error(&mut self, unit_id: UnitId) -> Completion {
        let config = self.config;
        let unit_config = &config.units[unit_id];
        let unit = &mut self.units[unit_id];
        let errors = unit.pdb.sequence_errors();
        if errors == 0 {
            return Completion::None;
        }
        log::error!("Unit {unit_id}: trigger sequence error {errors:#06x}");
        self.sink.report_error(ErrorId::SequenceError, unit_id);

        let unit = &mut self.units[unit_id];
        unit.pdb.clear_sequence_errors();
        match unit.status.snapshot {
            Some(snapshot) => unit.pdb.restore(&snapshot),
            None => unit.pdb.stop(),
        }
        self.drain(unit_id);

        if let Some(group_id) = self.units[unit_id].status.active() {
            let group = &config.groups[group_id];
            let start = self.groups[group_id].current_channel;
            let count =
                batch_len(unit_config.slots, group.channel_count(), start);
            let software = start > 0 || group.trigger == TriggerKind::Software;
            self.rearm_dma(unit_id, group_id);
            if software {
                if let Err(err) = self.units[unit_id].pdb.start_software() {
                    log::warn!("Unit {unit_id}: reprogramming after {err}");
                    self.program_batch(
                        unit_id,
                        group_id,
                        start,
                        count,
                        Arm::Software,
                    );
                }
            }
        }

        unit_config
            .error_notification
            .map_or(Completion::None, |notify| {
                Completion::UnitError(unit_id, notify)
            })
    }
}
