use crate::error::ComposeError;
use crate::skeleton::TransactionSkeleton;

use spore_format::types::LiveCell;

use ckb_types::{
    bytes::Bytes,
    core::Capacity,
    packed::{CellOutput, Script},
    prelude::*,
};

/// What balancing settled on: the fee implied by the final skeleton and the
/// index of the appended change output, when one was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceReport {
    pub fee: u64,
    pub change_index: Option<usize>,
}

/// Fee for a transaction of `tx_size` bytes at `fee_rate` shannons per 1000
/// bytes, rounded up.
pub fn calculate_fee(tx_size: usize, fee_rate: u64) -> u64 {
    let weight = tx_size as u64 * fee_rate;
    weight / 1000 + u64::from(weight % 1000 != 0)
}

/// Minimum capacity a bare change cell under `lock` can carry on chain.
pub fn min_change_capacity(lock: &Script) -> Result<u64, ComposeError> {
    CellOutput::new_builder()
        .lock(lock.clone())
        .build()
        .occupied_capacity(Capacity::zero())
        .map(|capacity| capacity.as_u64())
        .map_err(|_| ComposeError::CapacityOverflow)
}

/// Selects funding inputs from `candidates` and settles the fee.
///
/// A change output to `change_lock` is appended when the leftover covers
/// `min_change` (defaulting to the change cell's occupied capacity); a
/// leftover below that threshold is folded into the fee instead of producing
/// a dust cell. Candidates whose out point is already consumed by the
/// skeleton are skipped.
pub fn inject_capacity_and_pay_fee(
    skeleton: &mut TransactionSkeleton,
    candidates: &[LiveCell],
    change_lock: &Script,
    fee_rate: u64,
    min_change: Option<u64>,
) -> Result<BalanceReport, ComposeError> {
    let min_change = match min_change {
        Some(value) => value,
        None => min_change_capacity(change_lock)?,
    };
    let mut next_candidate = 0usize;
    loop {
        let inputs_total = skeleton.total_input_capacity()?;
        let outputs_total = skeleton.total_output_capacity()?;

        let fee_with_change = calculate_fee(estimated_size(skeleton, Some(change_lock)), fee_rate);
        let required_with_change = outputs_total
            .checked_add(fee_with_change)
            .and_then(|value| value.checked_add(min_change))
            .ok_or(ComposeError::CapacityOverflow)?;
        if inputs_total >= required_with_change {
            let change_capacity = inputs_total - outputs_total - fee_with_change;
            let change = CellOutput::new_builder()
                .capacity(change_capacity.pack())
                .lock(change_lock.clone())
                .build();
            let change_index = skeleton.add_output(change, Bytes::new());
            skeleton.fill_witness_placeholders();
            log::debug!(
                "balanced with change of {} shannons, fee {}",
                change_capacity,
                fee_with_change
            );
            return Ok(BalanceReport {
                fee: fee_with_change,
                change_index: Some(change_index),
            });
        }

        let fee_floor = calculate_fee(estimated_size(skeleton, None), fee_rate);
        let required = outputs_total
            .checked_add(fee_floor)
            .ok_or(ComposeError::CapacityOverflow)?;
        if inputs_total >= required {
            // leftover below the change threshold becomes fee
            let fee = inputs_total - outputs_total;
            skeleton.fill_witness_placeholders();
            log::debug!("balanced without change, fee {}", fee);
            return Ok(BalanceReport {
                fee,
                change_index: None,
            });
        }

        let mut advanced = false;
        while next_candidate < candidates.len() {
            let cell = &candidates[next_candidate];
            next_candidate += 1;
            if skeleton.has_input(&cell.out_point) {
                log::debug!("funding candidate already consumed by this skeleton, skipping");
                continue;
            }
            skeleton.add_input(cell.clone())?;
            advanced = true;
            break;
        }
        if !advanced {
            return Err(ComposeError::InsufficientCapacity {
                required,
                available: inputs_total,
            });
        }
    }
}

/// Serialized size the skeleton would have in a block, with placeholder
/// witnesses and, optionally, a change output under `change_lock` counted in.
fn estimated_size(skeleton: &TransactionSkeleton, change_lock: Option<&Script>) -> usize {
    let mut probe = skeleton.clone();
    if let Some(lock) = change_lock {
        probe.add_output(
            CellOutput::new_builder().lock(lock.clone()).build(),
            Bytes::new(),
        );
    }
    probe.fill_witness_placeholders();
    probe.build_tx().data().serialized_size_in_block()
}
