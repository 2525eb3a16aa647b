use alloy::primitives::Address;
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

pub const POLYGON_NARRATIVE_CONTRACT: &str = "0x40632f44E5CF7F7A229F4b0c018282fad8534ede";
pub const DEFAULT_POLYGON_RPC_URL: &str = "https://polygon-rpc.com";
pub const DEFAULT_POLYGON_EXPLORER_URL: &str = "https://polygonscan.com";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";
pub const DEFAULT_LOCAL_EXPLORER_URL: &str = "http://localhost:4000";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Polygon,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Polygon => "polygon",
            DeploymentEnv::Local => "local",
        }
    }

    /// Record used when nothing has been stored for this network.
    pub fn builtin(self) -> Option<DeploymentRecord> {
        match self {
            DeploymentEnv::Polygon => Some(DeploymentRecord {
                recorded_at: String::from("builtin"),
                narrative_contract: POLYGON_NARRATIVE_CONTRACT.to_string(),
                rpc_url: DEFAULT_POLYGON_RPC_URL.to_string(),
                explorer_url: DEFAULT_POLYGON_EXPLORER_URL.to_string(),
            }),
            DeploymentEnv::Local => None,
        }
    }

    pub fn default_rpc_url(self) -> &'static str {
        match self {
            DeploymentEnv::Polygon => DEFAULT_POLYGON_RPC_URL,
            DeploymentEnv::Local => DEFAULT_LOCAL_RPC_URL,
        }
    }

    pub fn default_explorer_url(self) -> &'static str {
        match self {
            DeploymentEnv::Polygon => DEFAULT_POLYGON_EXPLORER_URL,
            DeploymentEnv::Local => DEFAULT_LOCAL_EXPLORER_URL,
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Polygon => "Polygon",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub recorded_at: String,
    pub narrative_contract: String,
    pub rpc_url: String,
    pub explorer_url: String,
}

impl DeploymentRecord {
    pub fn new(
        narrative_contract: Address,
        rpc_url: impl Into<String>,
        explorer_url: impl Into<String>,
    ) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339(),
            narrative_contract: narrative_contract.to_checksum(None),
            rpc_url: rpc_url.into(),
            explorer_url: explorer_url.into(),
        }
    }

    pub fn narrative_address(&self) -> Result<Address> {
        Address::from_str(&self.narrative_contract).wrap_err_with(|| {
            format!(
                "deployment record holds an invalid contract address '{}'",
                self.narrative_contract
            )
        })
    }
}

impl fmt::Display for DeploymentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} @ {} (explorer {})",
            self.recorded_at, self.narrative_contract, self.rpc_url, self.explorer_url
        )
    }
}

/// Settings a session runs with after CLI overrides are applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDeployment {
    pub narrative_contract: Address,
    pub rpc_url: String,
    pub explorer_url: String,
}

/// CLI flags win over the latest stored record, which wins over the
/// built-in default.
pub fn resolve(
    env: DeploymentEnv,
    stored: Option<DeploymentRecord>,
    contract_override: Option<Address>,
    rpc_override: Option<String>,
) -> Result<ResolvedDeployment> {
    let base = stored.or_else(|| env.builtin());
    let narrative_contract = match (contract_override, base.as_ref()) {
        (Some(address), _) => address,
        (None, Some(record)) => record.narrative_address()?,
        (None, None) => {
            return Err(eyre!(
                "No narrative contract known for {env}; pass --narrative-contract or record one with `deployments add`"
            ));
        }
    };
    let rpc_url = rpc_override
        .or_else(|| base.as_ref().map(|r| r.rpc_url.clone()))
        .unwrap_or_else(|| env.default_rpc_url().to_string());
    let explorer_url = base
        .map(|r| r.explorer_url)
        .unwrap_or_else(|| env.default_explorer_url().to_string());
    Ok(ResolvedDeployment {
        narrative_contract,
        rpc_url,
        explorer_url,
    })
}

#[derive(Debug)]
pub struct DeploymentStore {
    env: DeploymentEnv,
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::new_in(Path::new(DEPLOYMENTS_ROOT), env)
    }

    pub fn new_in(root: &Path, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root, env)?;
        Ok(Self { env, path })
    }

    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        read_records(&self.path)
    }

    pub fn latest(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.load()?.pop())
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_records(&self.path, &records)
    }

    /// Appends a record for `contract`, filling unset URLs with the
    /// environment defaults. The record is returned only once it is on disk.
    pub fn record(
        &self,
        contract: Address,
        rpc_url: Option<String>,
        explorer_url: Option<String>,
    ) -> Result<DeploymentRecord> {
        let record = DeploymentRecord::new(
            contract,
            rpc_url.unwrap_or_else(|| self.env.default_rpc_url().to_string()),
            explorer_url.unwrap_or_else(|| self.env.default_explorer_url().to_string()),
        );
        self.append(record.clone())
            .wrap_err_with(|| format!("Failed to record deployment for {}", self.env))?;
        Ok(record)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).wrap_err_with(|| {
            format!("Failed to create deployments directory {}", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).wrap_err_with(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"[]").wrap_err_with(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).wrap_err("Failed to read deployment records")?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let records = serde_json::from_slice::<Vec<DeploymentRecord>>(&data)
        .wrap_err("Failed to parse deployment records JSON")?;
    Ok(records)
}

fn write_records(path: impl AsRef<Path>, records: &[DeploymentRecord]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .wrap_err("Failed to serialize deployment records")?;
    fs::write(path.as_ref(), json).wrap_err("Failed to write deployment records")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn store__creates_empty_record_file_and_appends() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::new_in(dir.path(), DeploymentEnv::Local).unwrap();
        assert!(store.load().unwrap().is_empty());
        let record = DeploymentRecord::new(
            Address::with_last_byte(1),
            DEFAULT_LOCAL_RPC_URL,
            DEFAULT_LOCAL_EXPLORER_URL,
        );

        // when
        store.append(record.clone()).unwrap();

        // then
        assert_eq!(store.latest().unwrap(), Some(record));
        assert!(store.path().ends_with("local/deployments.json"));
    }

    #[test]
    fn record__fills_environment_defaults() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::new_in(dir.path(), DeploymentEnv::Local).unwrap();

        // when
        let record = store.record(Address::with_last_byte(2), None, None).unwrap();

        // then
        assert_eq!(record.rpc_url, DEFAULT_LOCAL_RPC_URL);
        assert_eq!(record.explorer_url, DEFAULT_LOCAL_EXPLORER_URL);
        assert_eq!(store.load().unwrap(), vec![record]);
    }

    #[test]
    fn record__unreadable_store_returns_no_record() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::new_in(dir.path(), DeploymentEnv::Local).unwrap();
        fs::write(store.path(), b"not json").unwrap();

        // when
        let result = store.record(Address::with_last_byte(3), None, None);

        // then
        let error = result.unwrap_err();
        assert!(format!("{error:#}").contains("Failed to record deployment for Local"));
        assert_eq!(fs::read(store.path()).unwrap(), b"not json");
    }

    #[test]
    fn resolve__falls_back_to_builtin_polygon_deployment() {
        // when
        let resolved = resolve(DeploymentEnv::Polygon, None, None, None).unwrap();

        // then
        assert_eq!(
            resolved.narrative_contract,
            Address::from_str(POLYGON_NARRATIVE_CONTRACT).unwrap()
        );
        assert_eq!(resolved.rpc_url, DEFAULT_POLYGON_RPC_URL);
        assert_eq!(resolved.explorer_url, DEFAULT_POLYGON_EXPLORER_URL);
    }

    #[test]
    fn resolve__cli_overrides_win_over_stored_record() {
        // given
        let stored = DeploymentRecord::new(
            Address::with_last_byte(1),
            "http://stored:8545",
            "http://explorer",
        );

        // when
        let resolved = resolve(
            DeploymentEnv::Local,
            Some(stored),
            Some(Address::with_last_byte(2)),
            Some("http://override:8545".to_string()),
        )
        .unwrap();

        // then
        assert_eq!(resolved.narrative_contract, Address::with_last_byte(2));
        assert_eq!(resolved.rpc_url, "http://override:8545");
        assert_eq!(resolved.explorer_url, "http://explorer");
    }

    #[test]
    fn resolve__local_without_contract_is_an_error() {
        let result = resolve(DeploymentEnv::Local, None, None, None);

        assert!(result.is_err());
    }
}
