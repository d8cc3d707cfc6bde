use spore_format::SporeDataError;

use ckb_types::{packed::OutPoint, prelude::*, H256};
use derive_more::Display;

/// Everything that can go wrong while composing, signing or submitting.
///
/// `CellNotFound` is the only variant the query layer retries; the rest are
/// surfaced to the caller untouched.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ComposeError {
    #[display(fmt = "duplicate input {:#x}:{}", tx_hash, index)]
    DuplicateInput { tx_hash: H256, index: u32 },

    #[display(
        fmt = "insufficient capacity: required {} shannons, available {}",
        required,
        available
    )]
    InsufficientCapacity { required: u64, available: u64 },

    #[display(fmt = "cell not found at {:#x}:{}", tx_hash, index)]
    CellNotFound { tx_hash: H256, index: u32 },

    #[display(fmt = "no cell dependency satisfies script {}", script)]
    MissingCellDependency { script: String },

    #[display(fmt = "cell at {:#x}:{} is not a {} cell", tx_hash, index, expected)]
    TypeScriptMismatch {
        tx_hash: H256,
        index: u32,
        expected: String,
    },

    #[display(fmt = "invalid cell data: {}", _0)]
    Data(SporeDataError),

    #[display(fmt = "signing failed: {}", _0)]
    Signing(String),

    #[display(fmt = "rpc request failed: {}", _0)]
    Rpc(String),

    #[display(fmt = "broadcast rejected: {}", _0)]
    Broadcast(String),

    #[display(fmt = "capacity overflow")]
    CapacityOverflow,
}

impl std::error::Error for ComposeError {}

impl From<SporeDataError> for ComposeError {
    fn from(err: SporeDataError) -> Self {
        ComposeError::Data(err)
    }
}

impl ComposeError {
    pub fn duplicate_input(out_point: &OutPoint) -> Self {
        ComposeError::DuplicateInput {
            tx_hash: out_point.tx_hash().unpack(),
            index: out_point.index().unpack(),
        }
    }

    pub fn cell_not_found(out_point: &OutPoint) -> Self {
        ComposeError::CellNotFound {
            tx_hash: out_point.tx_hash().unpack(),
            index: out_point.index().unpack(),
        }
    }

    pub fn type_script_mismatch(out_point: &OutPoint, expected: &str) -> Self {
        ComposeError::TypeScriptMismatch {
            tx_hash: out_point.tx_hash().unpack(),
            index: out_point.index().unpack(),
            expected: expected.to_owned(),
        }
    }
}
