use crate::error::ComposeError;

use spore_format::types::LiveCell;

use ckb_sdk::constants::SECP_SIGNATURE_SIZE;
use ckb_types::{
    bytes::Bytes,
    core::TransactionView,
    packed::{self, CellDep, CellInput, CellOutput, OutPoint, Script, WitnessArgs},
    prelude::*,
};

/// A lock-script group: every input sharing one lock script. The witness slot
/// of a group sits at the index of its first input.
#[derive(Debug, Clone)]
pub struct LockGroup {
    pub script: Script,
    pub input_indices: Vec<usize>,
}

/// A transaction under composition: ordered inputs and outputs, a deduped
/// cell-dependency set and one witness slot per input.
///
/// Skeletons are plain values. They are never shared between compositions;
/// each signing pass consumes a reference and returns a new skeleton, so a
/// half-signed skeleton can be handed to the next party as-is.
#[derive(Debug, Clone, Default)]
pub struct TransactionSkeleton {
    inputs: Vec<LiveCell>,
    outputs: Vec<(CellOutput, Bytes)>,
    cell_deps: Vec<CellDep>,
    witnesses: Vec<packed::Bytes>,
}

impl TransactionSkeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input cell, rejecting an out point already consumed by this
    /// skeleton. Returns the input's index.
    pub fn add_input(&mut self, cell: LiveCell) -> Result<usize, ComposeError> {
        if self.has_input(&cell.out_point) {
            return Err(ComposeError::duplicate_input(&cell.out_point));
        }
        self.inputs.push(cell);
        Ok(self.inputs.len() - 1)
    }

    pub fn has_input(&self, out_point: &OutPoint) -> bool {
        self.inputs.iter().any(|cell| &cell.out_point == out_point)
    }

    /// Appends an output and its data. Returns the output's index.
    pub fn add_output(&mut self, output: CellOutput, data: Bytes) -> usize {
        self.outputs.push((output, data));
        self.outputs.len() - 1
    }

    /// Replaces an existing output in place, keeping its data.
    pub fn update_output(&mut self, index: usize, output: CellOutput) {
        self.outputs[index].0 = output;
    }

    /// Idempotent: a dependency already present is not added again.
    pub fn add_cell_dep(&mut self, cell_dep: CellDep) {
        if !self.cell_deps.contains(&cell_dep) {
            self.cell_deps.push(cell_dep);
        }
    }

    pub fn inputs(&self) -> &[LiveCell] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[(CellOutput, Bytes)] {
        &self.outputs
    }

    pub fn cell_deps(&self) -> &[CellDep] {
        &self.cell_deps
    }

    pub fn witnesses(&self) -> &[packed::Bytes] {
        &self.witnesses
    }

    pub fn set_witness(&mut self, index: usize, witness: packed::Bytes) {
        self.witnesses[index] = witness;
    }

    /// The first input as it will appear on chain, once inputs are final.
    pub fn first_input_reference(&self) -> Option<CellInput> {
        self.inputs
            .first()
            .map(|cell| CellInput::new(cell.out_point.clone(), 0))
    }

    pub fn total_input_capacity(&self) -> Result<u64, ComposeError> {
        self.inputs.iter().try_fold(0u64, |acc, cell| {
            acc.checked_add(cell.capacity())
                .ok_or(ComposeError::CapacityOverflow)
        })
    }

    pub fn total_output_capacity(&self) -> Result<u64, ComposeError> {
        self.outputs.iter().try_fold(0u64, |acc, (output, _)| {
            let capacity: u64 = output.capacity().unpack();
            acc.checked_add(capacity)
                .ok_or(ComposeError::CapacityOverflow)
        })
    }

    /// Groups inputs by lock script, in order of first appearance.
    pub fn lock_groups(&self) -> Vec<LockGroup> {
        let mut groups: Vec<LockGroup> = Vec::new();
        for (index, cell) in self.inputs.iter().enumerate() {
            let lock = cell.lock();
            match groups.iter_mut().find(|group| group.script == lock) {
                Some(group) => group.input_indices.push(index),
                None => groups.push(LockGroup {
                    script: lock,
                    input_indices: vec![index],
                }),
            }
        }
        groups
    }

    /// Ensures one witness slot per input: a placeholder `WitnessArgs` with a
    /// zeroed 65-byte lock at each group's first input, empty bytes elsewhere.
    /// Slots that already hold something are left untouched, so placeholders
    /// survive repeated calls and signed slots survive later inputs.
    pub fn fill_witness_placeholders(&mut self) {
        self.witnesses
            .resize(self.inputs.len(), packed::Bytes::default());
        for group in self.lock_groups() {
            let first = group.input_indices[0];
            if self.witnesses[first].is_empty() {
                let placeholder = WitnessArgs::new_builder()
                    .lock(Some(Bytes::from(vec![0u8; SECP_SIGNATURE_SIZE])).pack())
                    .build();
                self.witnesses[first] = placeholder.as_bytes().pack();
            }
        }
    }

    pub fn build_tx(&self) -> TransactionView {
        let inputs: Vec<CellInput> = self
            .inputs
            .iter()
            .map(|cell| CellInput::new(cell.out_point.clone(), 0))
            .collect();
        let (outputs, outputs_data): (Vec<CellOutput>, Vec<packed::Bytes>) = self
            .outputs
            .iter()
            .map(|(output, data)| (output.clone(), data.pack()))
            .unzip();
        TransactionView::new_advanced_builder()
            .inputs(inputs)
            .outputs(outputs)
            .outputs_data(outputs_data)
            .cell_deps(self.cell_deps.clone())
            .witnesses(self.witnesses.clone())
            .build()
    }
}
