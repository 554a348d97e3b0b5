//! Engine settings read from the `[engine]` table of a toml file.
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::open::{FieldScheme, OpeningMode};
use crate::party::error::{MpcError, MpcResult};
use crate::protocol::SecurityModel;
use crate::share::SchemeDescriptor;
use crate::thread::online::PurgePolicy;

fn default_threads() -> usize {
    1
}

fn default_max_broadcast() -> usize {
    1 << 16
}

fn default_length() -> usize {
    64
}

/// How the workers of one party run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub security: SecurityModel,
    #[serde(default)]
    pub opening: OpeningMode,
    /// Maximal number of elements per message of an indirect opening.
    #[serde(default = "default_max_broadcast")]
    pub max_broadcast: usize,
    /// Width of the chunks inputs are split into.
    #[serde(default = "default_length")]
    pub default_length: usize,
    #[serde(default)]
    pub purge_policy: PurgePolicy,
    /// How field values are shared, which decides how their openings are verified.
    #[serde(default)]
    pub field: FieldScheme,
    /// This party's share of the long-term MAC key.
    #[serde(default)]
    pub mac_key_share: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            security: SecurityModel::default(),
            opening: OpeningMode::default(),
            max_broadcast: default_max_broadcast(),
            default_length: default_length(),
            purge_policy: PurgePolicy::default(),
            field: FieldScheme::default(),
            mac_key_share: None,
        }
    }
}

#[derive(Deserialize)]
struct SerializedEngineConfig {
    #[serde(default)]
    engine: Option<EngineConfig>,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> MpcResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses the `[engine]` table, other tables are ignored so one file can hold the network setup too.
    pub fn from_toml(content: &str) -> MpcResult<Self> {
        let parsed: SerializedEngineConfig = toml::from_str(content).map_err(|err| MpcError::Config(err.to_string()))?;
        let config = parsed.engine.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MpcResult<()> {
        if self.threads == 0 {
            return Err(MpcError::Config("at least one thread is needed".to_string()));
        }
        if self.max_broadcast == 0 {
            return Err(MpcError::Config("max_broadcast must be positive".to_string()));
        }
        if self.field == FieldScheme::Mac && self.mac_key_share.is_none() {
            return Err(MpcError::Config("the MAC scheme needs mac_key_share".to_string()));
        }
        self.scheme().map_err(|err| MpcError::Config(err.to_string()))?;
        Ok(())
    }

    /// The scheme of replicated sharing among three parties with this configuration's chunk width.
    pub fn scheme(&self) -> MpcResult<SchemeDescriptor> {
        SchemeDescriptor::replicated(self.default_length)
    }

    /// A string that all parties must agree on before they run a session.
    pub fn protocol_string(&self) -> String {
        format!(
            "tutti;{:?};{:?};{:?};max_broadcast={};default_length={}",
            self.security, self.opening, self.field, self.max_broadcast, self.default_length
        )
    }
}
