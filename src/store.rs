use crate::{
    runner::{
        Runner,
        RunnerId,
    },
    sequencer::{
        SaveEvent,
        SaveRequest,
    },
};
use alloy::primitives::{
    Address,
    TxHash,
    U256,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Connection {
    #[default]
    Disconnected,
    Connected {
        address: Address,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TransactionState {
    #[default]
    None,
    Pending {
        hash: TxHash,
    },
    Failed {
        hash: Option<TxHash>,
        error: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LookupStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
    NotFound,
    Failed(String),
}

/// Messages the connection flow, the lookups and the save sequencer send to
/// the view. They are the only way [`ViewState`] changes.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewEvent {
    Connected {
        address: Address,
        cost: Option<U256>,
    },
    CostUpdated(U256),
    RunnerRequested(RunnerId),
    RunnerLoaded(Runner),
    RunnerNotFound(RunnerId),
    RunnerLookupFailed {
        id: RunnerId,
        error: String,
    },
    /// Narrative as recorded on chain; wins over the lookup service's copy.
    NarrativeLoaded {
        id: RunnerId,
        text: String,
    },
    Save(SaveEvent),
    DismissError,
    /// Free-form note for the status line.
    Status(String),
}

#[derive(Clone, Debug, Default)]
pub struct ViewState {
    pub connection: Connection,
    pub cost: Option<U256>,
    pub runner_id: Option<RunnerId>,
    pub runner: Option<Runner>,
    pub lookup: LookupStatus,
    /// Text of the submission in progress (or the last failed one).
    pub pending_narrative: Option<String>,
    pub tx: TransactionState,
    pub status: String,
    onchain_narrative: Option<String>,
    saving: bool,
}

impl ViewState {
    pub fn apply(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::Connected { address, cost } => {
                self.connection = Connection::Connected { address };
                if matches!(self.tx, TransactionState::Failed { .. }) {
                    self.tx = TransactionState::None;
                }
                if cost.is_some() {
                    self.cost = cost;
                }
                self.status = format!("Connected as {address}");
            }
            ViewEvent::CostUpdated(cost) => self.cost = Some(cost),
            ViewEvent::RunnerRequested(id) => {
                self.runner_id = Some(id);
                self.runner = None;
                self.onchain_narrative = None;
                self.pending_narrative = None;
                self.lookup = LookupStatus::Loading;
                self.status = format!("Looking up runner {id}...");
            }
            ViewEvent::RunnerLoaded(mut runner) => {
                if !self.is_current(runner.id) {
                    return;
                }
                if let Some(text) = self.onchain_narrative.clone() {
                    runner.narrative = Some(text);
                }
                self.status = format!("Loaded runner {}", runner.id);
                self.runner = Some(runner);
                self.lookup = LookupStatus::Loaded;
            }
            ViewEvent::RunnerNotFound(id) => {
                if !self.is_current(id) {
                    return;
                }
                self.lookup = LookupStatus::NotFound;
                self.status = format!("Runner {id} not found");
            }
            ViewEvent::RunnerLookupFailed { id, error } => {
                if !self.is_current(id) {
                    return;
                }
                self.lookup = LookupStatus::Failed(error);
                self.status = format!("Lookup of runner {id} failed");
            }
            ViewEvent::NarrativeLoaded { id, text } => {
                if !self.is_current(id) || text.is_empty() {
                    return;
                }
                self.splice_narrative(id, text);
            }
            ViewEvent::Save(event) => self.apply_save(event),
            ViewEvent::DismissError => {
                if matches!(self.tx, TransactionState::Failed { .. }) {
                    self.tx = TransactionState::None;
                }
                if matches!(self.lookup, LookupStatus::Failed(_)) {
                    self.lookup = LookupStatus::Idle;
                }
            }
            ViewEvent::Status(status) => self.status = status,
        }
    }

    fn apply_save(&mut self, event: SaveEvent) {
        match event {
            SaveEvent::Started { runner_id, text } => {
                self.saving = true;
                self.tx = TransactionState::None;
                if self.is_current(runner_id) {
                    self.pending_narrative = Some(text);
                }
                self.status = format!("Saving narrative for runner {runner_id}...");
            }
            SaveEvent::AwaitingApproval { runner_id, hash } => {
                self.tx = TransactionState::Pending { hash };
                self.status =
                    format!("Approving token spend for runner {runner_id}; waiting for {hash}");
            }
            SaveEvent::AwaitingWrite { runner_id, hash } => {
                self.tx = TransactionState::Pending { hash };
                self.status =
                    format!("Writing narrative for runner {runner_id}; waiting for {hash}");
            }
            SaveEvent::Succeeded {
                runner_id,
                text,
                hash,
            } => {
                self.saving = false;
                self.tx = TransactionState::None;
                if self.is_current(runner_id) {
                    self.pending_narrative = None;
                    self.splice_narrative(runner_id, text);
                }
                self.status = format!("Narrative for runner {runner_id} saved in {hash}");
            }
            SaveEvent::Failed { runner_id, failure } => {
                self.saving = false;
                self.tx = TransactionState::Failed {
                    hash: failure.tx_hash,
                    error: failure.to_string(),
                };
                self.status = format!("Saving narrative for runner {runner_id} failed");
            }
        }
    }

    fn is_current(&self, id: RunnerId) -> bool {
        self.runner_id == Some(id)
    }

    fn splice_narrative(&mut self, id: RunnerId, text: String) {
        self.onchain_narrative = Some(text.clone());
        if let Some(runner) = self.runner.as_mut().filter(|r| r.id == id) {
            runner.narrative = Some(text).filter(|t| !t.is_empty());
        }
    }

    pub fn address(&self) -> Option<Address> {
        match self.connection {
            Connection::Connected { address } => Some(address),
            Connection::Disconnected => None,
        }
    }

    pub fn is_owner(&self) -> bool {
        match (self.address(), self.current_runner()) {
            (Some(address), Some(runner)) => runner.owner == address,
            _ => false,
        }
    }

    pub fn current_runner(&self) -> Option<&Runner> {
        self.runner
            .as_ref()
            .filter(|runner| self.is_current(runner.id))
    }

    pub fn current_narrative(&self) -> Option<&str> {
        self.current_runner()
            .and_then(|runner| runner.narrative.as_deref())
    }

    pub fn is_saving(&self) -> bool {
        self.saving || matches!(self.tx, TransactionState::Pending { .. })
    }

    pub fn can_edit(&self) -> bool {
        self.is_owner() && !self.is_saving()
    }

    pub fn pending_tx_hash(&self) -> Option<TxHash> {
        match self.tx {
            TransactionState::Pending { hash } => Some(hash),
            _ => None,
        }
    }

    /// Explorer page of the transaction on screen, pending or failed.
    pub fn explorer_link(&self, explorer_url: &str) -> Option<String> {
        let hash = match &self.tx {
            TransactionState::Pending { hash } => *hash,
            TransactionState::Failed {
                hash: Some(hash), ..
            } => *hash,
            _ => return None,
        };
        Some(explorer_tx_link(explorer_url, &hash))
    }

    pub fn tx_error(&self) -> Option<&str> {
        match &self.tx {
            TransactionState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn lookup_error(&self) -> Option<&str> {
        match &self.lookup {
            LookupStatus::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Text the editor opens with: an unsaved submission first, then the
    /// recorded narrative.
    pub fn editor_seed(&self) -> String {
        self.pending_narrative
            .clone()
            .or_else(|| self.current_narrative().map(str::to_string))
            .unwrap_or_default()
    }

    /// Binds a save to the runner on screen right now. `None` when the
    /// connected wallet may not edit it.
    pub fn save_request(&self, text: String) -> Option<SaveRequest> {
        if !self.can_edit() {
            return None;
        }
        let runner = self.current_runner()?;
        Some(SaveRequest {
            runner_id: runner.id,
            text,
            current_narrative: runner.narrative.clone(),
        })
    }
}

pub fn explorer_tx_link(explorer_url: &str, hash: &TxHash) -> String {
    format!("{}/tx/{}", explorer_url.trim_end_matches('/'), hash)
}
