pub mod ckb_config;
pub mod composition;
pub mod script;

pub use ckb_config::CkbConfig;
pub use composition::CompositionConfig;
pub use script::ScriptConfigItem;

use anyhow::Result;
use ckb_jsonrpc_types::{CellDep, Script};
use ckb_types::packed;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use std::collections::HashMap;
use std::{fs::File, io::Read, path::Path};

pub const SPORE_SCRIPT_NAME: &str = "spore";
pub const CLUSTER_SCRIPT_NAME: &str = "cluster";
pub const SIGHASH_SCRIPT_NAME: &str = "secp256k1_blake160";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptInfo {
    pub script: packed::Script,
    pub cell_dep: packed::CellDep,
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct ConfigFile {
    pub ckb_config: CkbConfig,
    pub scripts: Vec<ScriptConfigItem>,
    #[serde(default)]
    pub composition: CompositionConfig,
}

impl ConfigFile {
    pub fn to_script_map(&self) -> HashMap<String, ScriptInfo> {
        self.scripts
            .iter()
            .map(|s| {
                (
                    s.get_script_name().to_owned(),
                    ScriptInfo {
                        script: serde_json::from_str::<Script>(s.get_script())
                            .expect("config string to script")
                            .into(),
                        cell_dep: serde_json::from_str::<CellDep>(s.get_cell_dep())
                            .expect("config string to cell dep")
                            .into(),
                    },
                )
            })
            .collect()
    }
}

impl From<ConfigFile> for AppConfig {
    fn from(config_file: ConfigFile) -> Self {
        Self::new(config_file)
    }
}

pub struct AppConfig {
    ckb_config: CkbConfig,
    script_config: ScriptConfig,
    composition_config: CompositionConfig,
}

impl AppConfig {
    pub fn new(config_file: ConfigFile) -> Self {
        let script_map = config_file.to_script_map();
        Self {
            ckb_config: config_file.ckb_config,
            script_config: ScriptConfig::new(script_map),
            composition_config: config_file.composition,
        }
    }

    pub fn get_ckb_config(&self) -> CkbConfig {
        self.ckb_config.clone()
    }

    pub fn get_script_config(&self) -> ScriptConfig {
        self.script_config.clone()
    }

    pub fn get_composition_config(&self) -> CompositionConfig {
        self.composition_config.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ScriptConfig {
    script_map: HashMap<String, ScriptInfo>,
}

impl ScriptConfig {
    pub fn new(script_map: HashMap<String, ScriptInfo>) -> Self {
        Self { script_map }
    }

    pub fn get_script_info(&self, script_name: &str) -> Option<ScriptInfo> {
        self.script_map.get(script_name).cloned()
    }

    pub fn get_cell_dep(&self, script_name: &str) -> Option<packed::CellDep> {
        self.script_map
            .get(script_name)
            .map(|s| s.cell_dep.clone())
    }

    pub fn get_spore_script_info(&self) -> ScriptInfo {
        self.script_map
            .get(SPORE_SCRIPT_NAME)
            .expect(SPORE_SCRIPT_NAME)
            .clone()
    }

    pub fn get_cluster_script_info(&self) -> ScriptInfo {
        self.script_map
            .get(CLUSTER_SCRIPT_NAME)
            .expect(CLUSTER_SCRIPT_NAME)
            .clone()
    }

    pub fn get_sighash_script_info(&self) -> ScriptInfo {
        self.script_map
            .get(SIGHASH_SCRIPT_NAME)
            .expect(SIGHASH_SCRIPT_NAME)
            .clone()
    }
}

pub fn parse<T: DeserializeOwned>(name: impl AsRef<Path>) -> Result<T> {
    parse_reader(&mut File::open(name)?)
}

fn parse_reader<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(toml::from_slice(&buf)?)
}
