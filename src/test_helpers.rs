//! In-memory stand-ins for the signer service and the chain, used by the
//! unit and integration tests.

use crate::{
    contracts::{
        NarrativeContracts,
        TxReceipt,
    },
    runner::{
        Authorization,
        Runner,
        RunnerId,
    },
    runner_api::Authorizer,
};
use alloy::primitives::{
    Address,
    Bytes,
    TxHash,
    U256,
    address,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
    },
};

pub const AUTHORIZATION_TIMESTAMP: u64 = 1_700_000_000;

pub fn narrative_address() -> Address {
    address!("0x40632f44e5cf7f7a229f4b0c018282fad8534ede")
}

pub fn owner_address() -> Address {
    address!("0x00000000000000000000000000000000000000aa")
}

pub fn runner(id: u64, owner: Address, narrative: Option<&str>) -> Runner {
    let mut attributes = BTreeMap::new();
    attributes.insert(
        "Faction".to_string(),
        crate::runner::AttributeValue::Text("Runner".to_string()),
    );
    Runner {
        id: RunnerId(id),
        owner,
        attributes,
        narrative: narrative.map(str::to_string),
        image: Some(format!("https://example.invalid/runner/{id}.png")),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    Cost,
    Narrative(RunnerId),
    Approve {
        spender: Address,
        amount: U256,
    },
    SetNarrative {
        runner_id: RunnerId,
        text: String,
        timestamp: u64,
        signature: Bytes,
    },
    WaitForReceipt(TxHash),
}

impl ContractCall {
    pub fn is_transaction(&self) -> bool {
        matches!(
            self,
            ContractCall::Approve { .. } | ContractCall::SetNarrative { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SentKind {
    Approve,
    Write,
}

struct FakeChain {
    cost: std::result::Result<U256, String>,
    approval_status: bool,
    write_status: bool,
    approval_send_error: Option<String>,
    write_send_error: Option<String>,
    receipt_errors: HashMap<SentKind, String>,
    calls: Vec<ContractCall>,
    sent: HashMap<TxHash, SentKind>,
    last_sent: Option<TxHash>,
    narratives: HashMap<RunnerId, String>,
    nonce: u8,
}

/// Records every call and answers with configurable receipts. A
/// `setNarrative` that is going to succeed updates the stored narratives.
#[derive(Clone)]
pub struct FakeContracts {
    chain: Arc<Mutex<FakeChain>>,
}

impl Default for FakeContracts {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeContracts {
    pub fn new() -> Self {
        Self {
            chain: Arc::new(Mutex::new(FakeChain {
                cost: Ok(U256::ZERO),
                approval_status: true,
                write_status: true,
                approval_send_error: None,
                write_send_error: None,
                receipt_errors: HashMap::new(),
                calls: Vec::new(),
                sent: HashMap::new(),
                last_sent: None,
                narratives: HashMap::new(),
                nonce: 0,
            })),
        }
    }

    pub fn with_cost(self, cost: U256) -> Self {
        self.chain.lock().unwrap().cost = Ok(cost);
        self
    }

    pub fn failing_cost(self, message: &str) -> Self {
        self.chain.lock().unwrap().cost = Err(message.to_string());
        self
    }

    pub fn with_approval_status(self, status: bool) -> Self {
        self.chain.lock().unwrap().approval_status = status;
        self
    }

    pub fn with_write_status(self, status: bool) -> Self {
        self.set_write_status(status);
        self
    }

    pub fn set_write_status(&self, status: bool) {
        self.chain.lock().unwrap().write_status = status;
    }

    pub fn failing_approval_send(self, message: &str) -> Self {
        self.chain.lock().unwrap().approval_send_error = Some(message.to_string());
        self
    }

    pub fn failing_write_send(self, message: &str) -> Self {
        self.chain.lock().unwrap().write_send_error = Some(message.to_string());
        self
    }

    /// Sending succeeds but waiting for the receipt of `kind` errors.
    pub fn failing_receipt(self, kind: SentKind, message: &str) -> Self {
        self.chain
            .lock()
            .unwrap()
            .receipt_errors
            .insert(kind, message.to_string());
        self
    }

    pub fn with_narrative(self, runner_id: RunnerId, text: &str) -> Self {
        self.chain
            .lock()
            .unwrap()
            .narratives
            .insert(runner_id, text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ContractCall> {
        self.chain.lock().unwrap().calls.clone()
    }

    /// Only the calls that would have broadcast a transaction, in order.
    pub fn transactions(&self) -> Vec<ContractCall> {
        self.calls()
            .into_iter()
            .filter(ContractCall::is_transaction)
            .collect()
    }

    pub fn last_sent_hash(&self) -> Option<TxHash> {
        self.chain.lock().unwrap().last_sent
    }

    pub fn stored_narrative(&self, runner_id: RunnerId) -> Option<String> {
        self.chain
            .lock()
            .unwrap()
            .narratives
            .get(&runner_id)
            .cloned()
    }

    fn record_sent(chain: &mut FakeChain, kind: SentKind) -> TxHash {
        chain.nonce = chain.nonce.wrapping_add(1);
        let hash = TxHash::with_last_byte(chain.nonce);
        chain.sent.insert(hash, kind);
        chain.last_sent = Some(hash);
        hash
    }
}

impl NarrativeContracts for FakeContracts {
    fn account(&self) -> Address {
        owner_address()
    }

    fn narrative_address(&self) -> Address {
        narrative_address()
    }

    async fn cost(&self) -> Result<U256> {
        let mut chain = self.chain.lock().unwrap();
        chain.calls.push(ContractCall::Cost);
        chain.cost.clone().map_err(|message| eyre!(message))
    }

    async fn narrative(&self, runner_id: RunnerId) -> Result<String> {
        let mut chain = self.chain.lock().unwrap();
        chain.calls.push(ContractCall::Narrative(runner_id));
        Ok(chain.narratives.get(&runner_id).cloned().unwrap_or_default())
    }

    async fn send_approve(&self, spender: Address, amount: U256) -> Result<TxHash> {
        let mut chain = self.chain.lock().unwrap();
        if let Some(message) = chain.approval_send_error.clone() {
            return Err(eyre!(message));
        }
        chain.calls.push(ContractCall::Approve { spender, amount });
        Ok(Self::record_sent(&mut chain, SentKind::Approve))
    }

    async fn send_set_narrative(
        &self,
        runner_id: RunnerId,
        text: &str,
        authorization: &Authorization,
    ) -> Result<TxHash> {
        let mut chain = self.chain.lock().unwrap();
        if let Some(message) = chain.write_send_error.clone() {
            return Err(eyre!(message));
        }
        chain.calls.push(ContractCall::SetNarrative {
            runner_id,
            text: text.to_string(),
            timestamp: authorization.timestamp,
            signature: authorization.signature.clone(),
        });
        let hash = Self::record_sent(&mut chain, SentKind::Write);
        if chain.write_status {
            chain.narratives.insert(runner_id, text.to_string());
        }
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt> {
        // mined "later", so concurrent callers get a chance to run
        tokio::task::yield_now().await;
        let mut chain = self.chain.lock().unwrap();
        chain.calls.push(ContractCall::WaitForReceipt(hash));
        let kind = match chain.sent.get(&hash) {
            Some(kind) => *kind,
            None => return Err(eyre!("unknown transaction {hash}")),
        };
        if let Some(message) = chain.receipt_errors.get(&kind) {
            return Err(eyre!(message.clone()));
        }
        let status = match kind {
            SentKind::Approve => chain.approval_status,
            SentKind::Write => chain.write_status,
        };
        Ok(TxReceipt {
            transaction_hash: hash,
            status,
        })
    }
}

struct FakeSigner {
    error: Option<String>,
    requests: Vec<RunnerId>,
}

#[derive(Clone)]
pub struct FakeAuthorizer {
    signer: Arc<Mutex<FakeSigner>>,
}

impl Default for FakeAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAuthorizer {
    pub fn new() -> Self {
        Self {
            signer: Arc::new(Mutex::new(FakeSigner {
                error: None,
                requests: Vec::new(),
            })),
        }
    }

    pub fn failing(self, message: &str) -> Self {
        self.signer.lock().unwrap().error = Some(message.to_string());
        self
    }

    pub fn requests(&self) -> Vec<RunnerId> {
        self.signer.lock().unwrap().requests.clone()
    }

    /// The authorization this fake hands out for `runner_id`.
    pub fn authorization_for(&self, runner_id: RunnerId) -> Authorization {
        let mut signature = vec![0u8; 65];
        signature[..8].copy_from_slice(&runner_id.0.to_be_bytes());
        Authorization {
            timestamp: AUTHORIZATION_TIMESTAMP,
            signature: Bytes::from(signature),
        }
    }
}

impl Authorizer for FakeAuthorizer {
    async fn authorization(&self, runner_id: RunnerId) -> Result<Authorization> {
        let error = {
            let mut signer = self.signer.lock().unwrap();
            signer.requests.push(runner_id);
            signer.error.clone()
        };
        match error {
            Some(message) => Err(eyre!(message)),
            None => Ok(self.authorization_for(runner_id)),
        }
    }
}
