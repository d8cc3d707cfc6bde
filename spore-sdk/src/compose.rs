use crate::error::ComposeError;
use crate::fee::{self, BalanceReport};
use crate::skeleton::TransactionSkeleton;
use crate::type_id::derive_type_id;

use spore_config::{
    CompositionConfig, ScriptConfig, ScriptInfo, CLUSTER_SCRIPT_NAME, SIGHASH_SCRIPT_NAME,
    SPORE_SCRIPT_NAME,
};
use spore_format::types::{ClusterData, LiveCell, SporeData};
use spore_format::SporeDataError;

use ckb_types::{
    bytes::Bytes,
    core::Capacity,
    packed::{CellDep, CellOutput, Script},
    prelude::*,
    H256,
};

/// Funding candidates owned by one lock, collected by an external cell
/// collector. The compiler consumes candidates in the order given.
#[derive(Debug, Clone)]
pub struct FundingSource {
    pub lock: Script,
    pub cells: Vec<LiveCell>,
}

/// Whether a composed output points at a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
    None,
    Cluster { cluster_id: H256 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: ReferenceTarget,
}

impl Reference {
    fn none() -> Self {
        Reference {
            target: ReferenceTarget::None,
        }
    }
}

/// A compiled operation: the balanced skeleton, the index of the freshly
/// created cell when the operation creates one, and its cluster reference.
#[derive(Debug, Clone)]
pub struct ComposeResult {
    pub skeleton: TransactionSkeleton,
    pub output_index: Option<usize>,
    pub reference: Reference,
    pub balance: BalanceReport,
}

#[derive(Debug, Clone)]
pub struct CreateSporeArgs {
    pub data: SporeData,
    pub to_lock: Script,
    pub funding: Vec<FundingSource>,
    /// The resolved cluster cell the new spore references, if any. Callers
    /// resolve it up front, e.g. via `query::get_cluster_by_out_point`.
    pub cluster: Option<LiveCell>,
    pub change_lock: Script,
}

#[derive(Debug, Clone)]
pub struct CreateClusterArgs {
    pub data: ClusterData,
    pub to_lock: Script,
    pub funding: Vec<FundingSource>,
    pub change_lock: Script,
}

#[derive(Debug, Clone)]
pub struct MeltSporeArgs {
    pub spore: LiveCell,
    pub change_lock: Script,
}

#[derive(Debug, Clone)]
pub struct MeltThenCreateSporeArgs {
    /// The cell being melted. It becomes the transaction's first input, so
    /// the new spore's identity derives from it.
    pub spore: LiveCell,
    pub data: SporeData,
    pub to_lock: Script,
    pub funding: Vec<FundingSource>,
    pub cluster: Option<LiveCell>,
    pub change_lock: Script,
}

/// The closed set of composable operations.
#[derive(Debug, Clone)]
pub enum SporeOperation {
    CreateSpore(CreateSporeArgs),
    CreateCluster(CreateClusterArgs),
    MeltSpore(MeltSporeArgs),
    MeltThenCreateSpore(MeltThenCreateSporeArgs),
}

pub struct SporeComposer {
    script_config: ScriptConfig,
    composition_config: CompositionConfig,
}

impl SporeComposer {
    pub fn new(script_config: ScriptConfig, composition_config: CompositionConfig) -> Self {
        SporeComposer {
            script_config,
            composition_config,
        }
    }

    pub fn compile(&self, operation: SporeOperation) -> Result<ComposeResult, ComposeError> {
        match operation {
            SporeOperation::CreateSpore(args) => self.create_spore(args),
            SporeOperation::CreateCluster(args) => self.create_cluster(args),
            SporeOperation::MeltSpore(args) => self.melt_spore(args),
            SporeOperation::MeltThenCreateSpore(args) => self.melt_then_create_spore(args),
        }
    }

    pub fn create_spore(&self, args: CreateSporeArgs) -> Result<ComposeResult, ComposeError> {
        self.compose_spore(
            TransactionSkeleton::new(),
            args.data,
            args.to_lock,
            args.funding,
            args.cluster,
            args.change_lock,
        )
    }

    pub fn create_cluster(&self, args: CreateClusterArgs) -> Result<ComposeResult, ComposeError> {
        let cluster_info = self.script_info(CLUSTER_SCRIPT_NAME)?;
        let sighash_info = self.script_info(SIGHASH_SCRIPT_NAME)?;

        let mut skeleton = TransactionSkeleton::new();
        skeleton.add_cell_dep(cluster_info.cell_dep.clone());
        skeleton.add_cell_dep(sighash_info.cell_dep.clone());

        let output_index = add_protocol_output(
            &mut skeleton,
            &cluster_info,
            args.to_lock,
            args.data.to_bytes(),
        )?;
        let balance = self.balance(&mut skeleton, args.funding, &args.change_lock)?;
        assign_type_id(&mut skeleton, output_index)?;
        self.verify_cell_deps(&skeleton, &[&cluster_info, &sighash_info])?;
        skeleton.fill_witness_placeholders();

        log::info!(
            "composed cluster creation: {} inputs, output at {}",
            skeleton.inputs().len(),
            output_index
        );
        Ok(ComposeResult {
            skeleton,
            output_index: Some(output_index),
            reference: Reference::none(),
            balance,
        })
    }

    pub fn melt_spore(&self, args: MeltSporeArgs) -> Result<ComposeResult, ComposeError> {
        let spore_info = self.script_info(SPORE_SCRIPT_NAME)?;
        let sighash_info = self.script_info(SIGHASH_SCRIPT_NAME)?;
        check_protocol_cell(&args.spore, &spore_info, SPORE_SCRIPT_NAME)?;

        let mut skeleton = TransactionSkeleton::new();
        skeleton.add_input(args.spore)?;
        skeleton.add_cell_dep(spore_info.cell_dep.clone());
        skeleton.add_cell_dep(sighash_info.cell_dep.clone());

        let balance = self.balance(&mut skeleton, Vec::new(), &args.change_lock)?;
        self.verify_cell_deps(&skeleton, &[&spore_info, &sighash_info])?;
        skeleton.fill_witness_placeholders();

        log::info!(
            "composed melt: reclaimed capacity {}",
            skeleton.total_input_capacity()?
        );
        Ok(ComposeResult {
            skeleton,
            output_index: None,
            reference: Reference::none(),
            balance,
        })
    }

    /// Melts an existing spore and creates a new one in the same transaction.
    /// Both mutations land on one skeleton before anything is signed, so
    /// neither can commit without the other. With the melted cell first, the
    /// new identity derives from it, tying the create to the melt on chain.
    pub fn melt_then_create_spore(
        &self,
        args: MeltThenCreateSporeArgs,
    ) -> Result<ComposeResult, ComposeError> {
        let spore_info = self.script_info(SPORE_SCRIPT_NAME)?;
        check_protocol_cell(&args.spore, &spore_info, SPORE_SCRIPT_NAME)?;

        let mut skeleton = TransactionSkeleton::new();
        skeleton.add_input(args.spore)?;
        self.compose_spore(
            skeleton,
            args.data,
            args.to_lock,
            args.funding,
            args.cluster,
            args.change_lock,
        )
    }

    /// Shared tail of every spore-creating operation. `skeleton` may already
    /// carry protocol inputs (the melt path); funding inputs are appended
    /// after them, keeping any melted cell in first position.
    fn compose_spore(
        &self,
        mut skeleton: TransactionSkeleton,
        mut data: SporeData,
        to_lock: Script,
        funding: Vec<FundingSource>,
        cluster: Option<LiveCell>,
        change_lock: Script,
    ) -> Result<ComposeResult, ComposeError> {
        data.check()?;
        let spore_info = self.script_info(SPORE_SCRIPT_NAME)?;
        let sighash_info = self.script_info(SIGHASH_SCRIPT_NAME)?;

        let reference = match &cluster {
            Some(cell) => {
                let cluster_info = self.script_info(CLUSTER_SCRIPT_NAME)?;
                check_protocol_cell(cell, &cluster_info, CLUSTER_SCRIPT_NAME)?;
                let cluster_id = cluster_id_of(cell)?;
                data.cluster_id = Some(cluster_id.clone());
                skeleton.add_cell_dep(
                    CellDep::new_builder()
                        .out_point(cell.out_point.clone())
                        .build(),
                );
                Reference {
                    target: ReferenceTarget::Cluster { cluster_id },
                }
            }
            None => {
                if data.cluster_id.is_some() {
                    // a cluster id in the data must come with the resolved cell
                    return Err(ComposeError::MissingCellDependency {
                        script: CLUSTER_SCRIPT_NAME.to_owned(),
                    });
                }
                Reference::none()
            }
        };

        skeleton.add_cell_dep(spore_info.cell_dep.clone());
        skeleton.add_cell_dep(sighash_info.cell_dep.clone());

        let output_index =
            add_protocol_output(&mut skeleton, &spore_info, to_lock, data.to_bytes())?;
        let balance = self.balance(&mut skeleton, funding, &change_lock)?;
        assign_type_id(&mut skeleton, output_index)?;
        self.verify_cell_deps(&skeleton, &[&spore_info, &sighash_info])?;
        skeleton.fill_witness_placeholders();

        log::info!(
            "composed spore creation: {} inputs, output at {}, reference {:?}",
            skeleton.inputs().len(),
            output_index,
            reference.target
        );
        Ok(ComposeResult {
            skeleton,
            output_index: Some(output_index),
            reference,
            balance,
        })
    }

    fn balance(
        &self,
        skeleton: &mut TransactionSkeleton,
        funding: Vec<FundingSource>,
        change_lock: &Script,
    ) -> Result<BalanceReport, ComposeError> {
        let candidates: Vec<LiveCell> = funding
            .into_iter()
            .flat_map(|source| source.cells)
            .collect();
        fee::inject_capacity_and_pay_fee(
            skeleton,
            &candidates,
            change_lock,
            self.composition_config.fee_rate,
            None,
        )
    }

    fn script_info(&self, name: &str) -> Result<ScriptInfo, ComposeError> {
        self.script_config
            .get_script_info(name)
            .ok_or_else(|| ComposeError::MissingCellDependency {
                script: name.to_owned(),
            })
    }

    /// Every type script on an output or input, and every input lock, must be
    /// backed by one of the dependencies this compilation added.
    fn verify_cell_deps(
        &self,
        skeleton: &TransactionSkeleton,
        infos: &[&ScriptInfo],
    ) -> Result<(), ComposeError> {
        let missing = |script: &Script| {
            let code_hash: H256 = script.code_hash().unpack();
            ComposeError::MissingCellDependency {
                script: format!("{:#x}", code_hash),
            }
        };
        let covered = |script: &Script| infos.iter().any(|info| script_uses(info, script));
        for (output, _) in skeleton.outputs() {
            if let Some(type_script) = output.type_().to_opt() {
                if !covered(&type_script) {
                    return Err(missing(&type_script));
                }
            }
        }
        for cell in skeleton.inputs() {
            if let Some(type_script) = cell.type_script() {
                if !covered(&type_script) {
                    return Err(missing(&type_script));
                }
            }
            let lock = cell.lock();
            if !covered(&lock) {
                return Err(missing(&lock));
            }
        }
        Ok(())
    }
}

/// Appends an output under `info`'s type script with placeholder args, sized
/// to exactly its occupied capacity. Real args are assigned once inputs are
/// final; the placeholder keeps the serialized size stable for fee purposes.
fn add_protocol_output(
    skeleton: &mut TransactionSkeleton,
    info: &ScriptInfo,
    lock: Script,
    data: Bytes,
) -> Result<usize, ComposeError> {
    let type_script = info
        .script
        .clone()
        .as_builder()
        .args(Bytes::from(vec![0u8; 32]).pack())
        .build();
    let output = CellOutput::new_builder()
        .lock(lock)
        .type_(Some(type_script).pack())
        .build();
    let capacity = Capacity::bytes(data.len())
        .and_then(|data_capacity| output.occupied_capacity(data_capacity))
        .map_err(|_| ComposeError::CapacityOverflow)?;
    let output = output.as_builder().capacity(capacity.pack()).build();
    Ok(skeleton.add_output(output, data))
}

/// Replaces the placeholder type args of `output_index` with the identity
/// derived from the skeleton's first input. Inputs must be final.
fn assign_type_id(
    skeleton: &mut TransactionSkeleton,
    output_index: usize,
) -> Result<(), ComposeError> {
    let first_input = skeleton
        .first_input_reference()
        .ok_or(ComposeError::InsufficientCapacity {
            required: 1,
            available: 0,
        })?;
    let id = derive_type_id(&first_input, output_index);
    let (output, _) = skeleton.outputs()[output_index].clone();
    let type_script = output
        .type_()
        .to_opt()
        .expect("protocol output carries a type script")
        .as_builder()
        .args(Bytes::from(id.to_vec()).pack())
        .build();
    let output = output
        .as_builder()
        .type_(Some(type_script).pack())
        .build();
    skeleton.update_output(output_index, output);
    Ok(())
}

fn check_protocol_cell(
    cell: &LiveCell,
    info: &ScriptInfo,
    script_name: &str,
) -> Result<(), ComposeError> {
    let matches = cell
        .type_script()
        .map(|type_script| script_uses(info, &type_script))
        .unwrap_or(false);
    if !matches {
        return Err(ComposeError::type_script_mismatch(
            &cell.out_point,
            script_name,
        ));
    }
    Ok(())
}

fn cluster_id_of(cell: &LiveCell) -> Result<H256, ComposeError> {
    let type_script = cell
        .type_script()
        .ok_or_else(|| ComposeError::type_script_mismatch(&cell.out_point, CLUSTER_SCRIPT_NAME))?;
    let args = type_script.args().raw_data();
    if args.len() != 32 {
        return Err(ComposeError::Data(SporeDataError::InvalidClusterId(
            args.len(),
        )));
    }
    Ok(H256::from_slice(&args).expect("checked length"))
}

fn script_uses(info: &ScriptInfo, script: &Script) -> bool {
    info.script.code_hash() == script.code_hash()
        && info.script.hash_type().as_slice() == script.hash_type().as_slice()
}
