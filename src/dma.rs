//! Block transfer completion handling.
//!
//! The DMA engine moves a batch of slot results into the group buffer, or into
//! the unit staging area when the group is limit checked. The remaining
//! transitions are shared with the interrupt path.
use crate::{
    adc::Inner,
    batch::batch_len,
    config::{CompletionMode, UnitId},
    design_parameters::MAX_SLOTS,
    interrupt::Completion,
    peripheral::{AdcRegisters, DmaManager, ErrorSink},
};

impl<A, P, D, E> Inner<'_, A, P, D, E>
where
    A: AdcRegisters,
    P: pdb::Registers,
    D: DmaManager,
    E: ErrorSink,
{
    pub(crate) fn dma_complete(&mut self, unit_id: UnitId) -> Completion {
        let config = self.config;
        let unit_config = &config.units[unit_id];
        let Some(channel) = unit_config
            .dma_channel
            .filter(|_| unit_config.completion == CompletionMode::Dma)
        else {
            log::warn!("Unit {unit_id}: DMA complete on interrupt unit");
            return Completion::None;
        };
        let Some(group_id) = self.units[unit_id].status.active() else {
            log::warn!("Unit {unit_id}: DMA complete while idle");
            return Completion::None;
        };
        let outstanding = self.dma.iteration_count(channel);
        if outstanding != 0 {
            log::warn!(
                "Unit {unit_id}: spurious DMA complete, {outstanding} left"
            );
            return Completion::None;
        }

        let group = &config.groups[group_id];
        if !group.limit_check {
            return self.complete_batch(unit_id, group_id, None);
        }

        let start = self.groups[group_id].current_channel;
        let count = batch_len(unit_config.slots, group.channel_count(), start);
        let status = &self.units[unit_id].status;
        let mut results = [0; MAX_SLOTS];
        for (i, result) in results[..count].iter_mut().enumerate() {
            *result = status.staging(i);
        }
        self.complete_batch(unit_id, group_id, Some(&results[..count]))
    }
}
