use crate::error::ComposeError;

use spore_config::{CompositionConfig, ScriptConfig, CLUSTER_SCRIPT_NAME, SPORE_SCRIPT_NAME};
use spore_format::types::LiveCell;

use anyhow::Result;
use ckb_jsonrpc_types::OutputsValidator;
use ckb_sdk::CkbRpcClient;
use ckb_types::{core::TransactionView, packed::OutPoint, prelude::*, H256};
use serde::Serialize;

use std::thread;
use std::time::Duration;

/// Read access to the ledger's live-cell index.
pub trait LiveCellProvider {
    fn get_cell_by_out_point(&self, out_point: &OutPoint) -> Result<LiveCell, ComposeError>;
}

pub struct CkbLiveCellProvider {
    ckb_uri: String,
}

impl CkbLiveCellProvider {
    pub fn new(ckb_uri: &str) -> Self {
        CkbLiveCellProvider {
            ckb_uri: ckb_uri.to_owned(),
        }
    }
}

impl LiveCellProvider for CkbLiveCellProvider {
    fn get_cell_by_out_point(&self, out_point: &OutPoint) -> Result<LiveCell, ComposeError> {
        let mut client = CkbRpcClient::new(&self.ckb_uri);
        let cell = client
            .get_live_cell(out_point.clone().into(), true)
            .map_err(|err| ComposeError::Rpc(err.to_string()))?;
        let info = match (cell.status.as_str(), cell.cell) {
            ("live", Some(info)) => info,
            _ => return Err(ComposeError::cell_not_found(out_point)),
        };
        let data = info
            .data
            .map(|data| data.content.into_bytes())
            .unwrap_or_default();
        Ok(LiveCell {
            out_point: out_point.clone(),
            output: info.output.into(),
            data,
        })
    }
}

/// Bounded retry: a just-broadcast transaction may not be indexed yet, so
/// "not found" is retried up to `max_attempts` with `interval` between
/// attempts, multiplied by `backoff` each round (1 keeps it fixed).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: u32,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            interval,
            backoff: 1,
        }
    }

    pub fn from_config(config: &CompositionConfig) -> Self {
        RetryPolicy {
            max_attempts: config.retry_max_attempts,
            interval: Duration::from_millis(config.retry_interval_ms),
            backoff: config.retry_backoff,
        }
    }

    fn delay(&self, completed_attempts: u32) -> Duration {
        self.interval * self.backoff.saturating_pow(completed_attempts - 1)
    }
}

/// Runs `query` until it succeeds or the attempt budget is spent. Only
/// `CellNotFound` is retried; any other error is surfaced immediately, and so
/// is the last `CellNotFound` once the budget runs out.
pub fn retry_query<T, F>(policy: &RetryPolicy, mut query: F) -> Result<T, ComposeError>
where
    F: FnMut() -> Result<T, ComposeError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        if attempt > 1 {
            thread::sleep(policy.delay(attempt - 1));
        }
        match query() {
            Ok(value) => return Ok(value),
            Err(err @ ComposeError::CellNotFound { .. }) => {
                log::warn!("query attempt {}/{} failed: {}", attempt, attempts, err);
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("at least one attempt was made"))
}

pub fn get_spore_by_out_point(
    provider: &dyn LiveCellProvider,
    script_config: &ScriptConfig,
    out_point: &OutPoint,
) -> Result<LiveCell, ComposeError> {
    get_protocol_cell(provider, script_config, SPORE_SCRIPT_NAME, out_point)
}

pub fn get_cluster_by_out_point(
    provider: &dyn LiveCellProvider,
    script_config: &ScriptConfig,
    out_point: &OutPoint,
) -> Result<LiveCell, ComposeError> {
    get_protocol_cell(provider, script_config, CLUSTER_SCRIPT_NAME, out_point)
}

/// Fetches a cell and checks its type script against the named protocol
/// script from the configuration.
fn get_protocol_cell(
    provider: &dyn LiveCellProvider,
    script_config: &ScriptConfig,
    script_name: &str,
    out_point: &OutPoint,
) -> Result<LiveCell, ComposeError> {
    let info = script_config
        .get_script_info(script_name)
        .ok_or_else(|| ComposeError::MissingCellDependency {
            script: script_name.to_owned(),
        })?;
    let cell = provider.get_cell_by_out_point(out_point)?;
    let matches = cell
        .type_script()
        .map(|type_script| {
            type_script.code_hash() == info.script.code_hash()
                && type_script.hash_type().as_slice() == info.script.hash_type().as_slice()
        })
        .unwrap_or(false);
    if !matches {
        return Err(ComposeError::type_script_mismatch(out_point, script_name));
    }
    Ok(cell)
}

/// Submits a finished transaction. Rejections come back verbatim and are
/// never retried here: resubmitting a capacity-spending transaction blindly
/// risks a double-spend.
pub fn send_transaction(ckb_uri: &str, tx: TransactionView) -> Result<H256, ComposeError> {
    let tx_hash: H256 = tx.hash().unpack();
    log::info!("send tx: {:#x}", tx_hash);
    let tx: ckb_jsonrpc_types::TransactionView = tx.into();
    let outputs_validator = Some(OutputsValidator::Passthrough);
    CkbRpcClient::new(ckb_uri)
        .send_transaction(tx.inner, outputs_validator)
        .map_err(|err| ComposeError::Broadcast(err.to_string()))
}

pub fn dump_data<T>(data: &T, file_name: &str) -> Result<()>
where
    T: ?Sized + Serialize,
{
    let json_string = serde_json::to_string_pretty(data)?;
    std::fs::write(file_name, json_string).map_err(Into::into)
}

#[cfg(test)]
mod test {
    use super::*;
    use spore_config::{ScriptConfigItem, ScriptInfo};

    use ckb_types::{
        bytes::Bytes,
        core::ScriptHashType,
        packed::{Byte32, CellOutput, Script},
    };

    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FlakyProvider {
        cells: HashMap<OutPoint, LiveCell>,
        /// queries answered "not found" before the index catches up
        lag: RefCell<u32>,
        calls: RefCell<u32>,
    }

    impl FlakyProvider {
        fn new(cells: Vec<LiveCell>, lag: u32) -> Self {
            FlakyProvider {
                cells: cells
                    .into_iter()
                    .map(|cell| (cell.out_point.clone(), cell))
                    .collect(),
                lag: RefCell::new(lag),
                calls: RefCell::new(0),
            }
        }
    }

    impl LiveCellProvider for FlakyProvider {
        fn get_cell_by_out_point(&self, out_point: &OutPoint) -> Result<LiveCell, ComposeError> {
            *self.calls.borrow_mut() += 1;
            if *self.lag.borrow() > 0 {
                *self.lag.borrow_mut() -= 1;
                return Err(ComposeError::cell_not_found(out_point));
            }
            self.cells
                .get(out_point)
                .cloned()
                .ok_or_else(|| ComposeError::cell_not_found(out_point))
        }
    }

    fn spore_script_config() -> ScriptConfig {
        let spore_script = Script::new_builder()
            .code_hash(Byte32::from_slice(&[0xAA; 32]).unwrap())
            .hash_type(ScriptHashType::Data1.into())
            .build();
        let dep = ckb_types::packed::CellDep::new_builder()
            .out_point(OutPoint::new(Byte32::from_slice(&[0xAB; 32]).unwrap(), 0))
            .build();
        let mut map = HashMap::new();
        map.insert(
            SPORE_SCRIPT_NAME.to_owned(),
            ScriptInfo {
                script: spore_script,
                cell_dep: dep,
            },
        );
        ScriptConfig::new(map)
    }

    fn spore_cell(out_point: OutPoint, config: &ScriptConfig) -> LiveCell {
        let type_script = config
            .get_script_info(SPORE_SCRIPT_NAME)
            .unwrap()
            .script
            .as_builder()
            .args(Bytes::from(vec![1u8; 32]).pack())
            .build();
        LiveCell {
            out_point,
            output: CellOutput::new_builder()
                .capacity(20_000_000_000u64.pack())
                .type_(Some(type_script).pack())
                .build(),
            data: Bytes::from_static(b"spore"),
        }
    }

    #[test]
    fn test_retry_recovers_from_index_lag() {
        let config = spore_script_config();
        let out_point = OutPoint::new(Byte32::from_slice(&[1; 32]).unwrap(), 0);
        let provider = FlakyProvider::new(vec![spore_cell(out_point.clone(), &config)], 2);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));

        let cell = retry_query(&policy, || {
            get_spore_by_out_point(&provider, &config, &out_point)
        })
        .unwrap();
        assert_eq!(cell.out_point, out_point);
        assert_eq!(*provider.calls.borrow(), 3);
    }

    #[test]
    fn test_retry_budget_exhausted_surfaces_not_found() {
        let config = spore_script_config();
        let out_point = OutPoint::new(Byte32::from_slice(&[2; 32]).unwrap(), 0);
        let provider = FlakyProvider::new(vec![], 0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let err = retry_query(&policy, || {
            get_spore_by_out_point(&provider, &config, &out_point)
        })
        .unwrap_err();
        assert!(matches!(err, ComposeError::CellNotFound { .. }));
        assert_eq!(*provider.calls.borrow(), 3);
    }

    #[test]
    fn test_type_script_is_checked() {
        let config = spore_script_config();
        let out_point = OutPoint::new(Byte32::from_slice(&[3; 32]).unwrap(), 0);
        // a plain capacity cell under the queried out point
        let plain = LiveCell {
            out_point: out_point.clone(),
            output: CellOutput::new_builder()
                .capacity(20_000_000_000u64.pack())
                .build(),
            data: Bytes::new(),
        };
        let provider = FlakyProvider::new(vec![plain], 0);

        let err = get_spore_by_out_point(&provider, &config, &out_point).unwrap_err();
        assert!(matches!(err, ComposeError::TypeScriptMismatch { .. }));
    }

    #[test]
    fn test_non_retryable_errors_surface_immediately() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let mut calls = 0;
        let err: Result<(), ComposeError> = retry_query(&policy, || {
            calls += 1;
            Err(ComposeError::Rpc("connection refused".to_owned()))
        });
        assert!(matches!(err, Err(ComposeError::Rpc(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_script_config_round_trips_through_toml_item() {
        let item = ScriptConfigItem::new(
            SPORE_SCRIPT_NAME,
            r#"{"code_hash":"0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","hash_type":"data1","args":"0x"}"#,
            r#"{"out_point":{"tx_hash":"0xabababababababababababababababababababababababababababababababab","index":"0x0"},"dep_type":"code"}"#,
        );
        let script: ckb_jsonrpc_types::Script =
            serde_json::from_str(item.get_script()).unwrap();
        let script: Script = script.into();
        assert_eq!(
            script.code_hash(),
            Byte32::from_slice(&[0xAA; 32]).unwrap()
        );
    }
}
