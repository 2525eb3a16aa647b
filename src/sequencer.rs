//! Drives a single narrative save through its on-chain steps.
//!
//! A save fetches a fresh authorization for the runner, reads the current
//! cost, approves exactly that amount on the token contract when it is
//! non-zero, and only once the approval is mined sends `setNarrative`. Every
//! transition is reported as a [`SaveEvent`]; each accepted submission ends
//! with exactly one terminal event.

use crate::{
    contracts::NarrativeContracts,
    runner::RunnerId,
    runner_api::Authorizer,
};
use alloy::primitives::{
    TxHash,
    U256,
};
use std::{
    fmt,
    sync::{
        Mutex,
        PoisonError,
    },
};
use tokio::sync::mpsc;
use tracing::{
    debug,
    error,
    info,
    warn,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureCause {
    AuthorizationFetchFailed,
    CostQueryFailed,
    ApprovalTransactionReverted,
    ApprovalTransactionError,
    WriteTransactionReverted,
    WriteTransactionError,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureCause::AuthorizationFetchFailed => "authorization fetch failed",
            FailureCause::CostQueryFailed => "cost query failed",
            FailureCause::ApprovalTransactionReverted => "approval transaction reverted",
            FailureCause::ApprovalTransactionError => "approval transaction error",
            FailureCause::WriteTransactionReverted => "narrative transaction reverted",
            FailureCause::WriteTransactionError => "narrative transaction error",
        };
        write!(f, "{label}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SaveFailure {
    pub cause: FailureCause,
    /// Last transaction sent in this submission, if any.
    pub tx_hash: Option<TxHash>,
    pub message: String,
}

impl SaveFailure {
    fn new(
        cause: FailureCause,
        tx_hash: Option<TxHash>,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            cause,
            tx_hash,
            message: message.to_string(),
        }
    }

    fn from_report(
        cause: FailureCause,
        tx_hash: Option<TxHash>,
        report: color_eyre::Report,
    ) -> Self {
        // `{:#}` keeps the wrapped context chain on one line
        Self::new(cause, tx_hash, format!("{report:#}"))
    }
}

impl fmt::Display for SaveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.cause, self.message)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SaveState {
    #[default]
    Idle,
    Saving,
    AwaitingApproval {
        hash: TxHash,
    },
    AwaitingWrite {
        hash: TxHash,
    },
    Succeeded {
        hash: TxHash,
    },
    Failed(SaveFailure),
}

impl SaveState {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SaveState::Saving
                | SaveState::AwaitingApproval { .. }
                | SaveState::AwaitingWrite { .. }
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SaveRequest {
    pub runner_id: RunnerId,
    pub text: String,
    /// Narrative currently recorded for `runner_id`.
    pub current_narrative: Option<String>,
}

impl SaveRequest {
    pub fn is_unchanged(&self) -> bool {
        self.text == self.current_narrative.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SaveEvent {
    Started {
        runner_id: RunnerId,
        text: String,
    },
    AwaitingApproval {
        runner_id: RunnerId,
        hash: TxHash,
    },
    AwaitingWrite {
        runner_id: RunnerId,
        hash: TxHash,
    },
    Succeeded {
        runner_id: RunnerId,
        text: String,
        hash: TxHash,
    },
    Failed {
        runner_id: RunnerId,
        failure: SaveFailure,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Text matched the recorded narrative; nothing was sent.
    Unchanged,
    /// Another submission is in flight; this one was dropped.
    Busy,
    Succeeded { hash: TxHash },
    Failed(SaveFailure),
}

pub struct SaveSequencer<A, C> {
    authorizer: A,
    contracts: C,
    state: Mutex<SaveState>,
    events: mpsc::UnboundedSender<SaveEvent>,
}

impl<A, C> SaveSequencer<A, C>
where
    A: Authorizer,
    C: NarrativeContracts,
{
    pub fn new(
        authorizer: A,
        contracts: C,
        events: mpsc::UnboundedSender<SaveEvent>,
    ) -> Self {
        Self {
            authorizer,
            contracts,
            state: Mutex::new(SaveState::Idle),
            events,
        }
    }

    pub fn state(&self) -> SaveState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contracts(&self) -> &C {
        &self.contracts
    }

    pub async fn submit(&self, request: SaveRequest) -> SubmitOutcome {
        let runner_id = request.runner_id;
        if request.is_unchanged() {
            debug!(%runner_id, "narrative unchanged; skipping save");
            self.clear_finished();
            return SubmitOutcome::Unchanged;
        }
        if !self.try_begin() {
            warn!(%runner_id, "save already in flight; ignoring submission");
            return SubmitOutcome::Busy;
        }
        info!(%runner_id, "saving narrative");
        self.report(SaveEvent::Started {
            runner_id,
            text: request.text.clone(),
        });

        match self.drive(&request).await {
            Ok(hash) => {
                info!(%runner_id, %hash, "narrative saved");
                self.set_state(SaveState::Succeeded { hash });
                self.report(SaveEvent::Succeeded {
                    runner_id,
                    text: request.text,
                    hash,
                });
                SubmitOutcome::Succeeded { hash }
            }
            Err(failure) => {
                error!(%runner_id, cause = %failure.cause, message = %failure.message, "narrative save failed");
                self.set_state(SaveState::Failed(failure.clone()));
                self.report(SaveEvent::Failed {
                    runner_id,
                    failure: failure.clone(),
                });
                SubmitOutcome::Failed(failure)
            }
        }
    }

    async fn drive(&self, request: &SaveRequest) -> Result<TxHash, SaveFailure> {
        let runner_id = request.runner_id;
        let authorization = self
            .authorizer
            .authorization(runner_id)
            .await
            .map_err(|e| {
                SaveFailure::from_report(FailureCause::AuthorizationFetchFailed, None, e)
            })?;
        let cost = self.contracts.cost().await.map_err(|e| {
            SaveFailure::from_report(FailureCause::CostQueryFailed, None, e)
        })?;

        let mut last_hash = None;
        if cost > U256::ZERO {
            let spender = self.contracts.narrative_address();
            debug!(%runner_id, %spender, %cost, "approving token allowance");
            let hash = self
                .contracts
                .send_approve(spender, cost)
                .await
                .map_err(|e| {
                    SaveFailure::from_report(FailureCause::ApprovalTransactionError, None, e)
                })?;
            last_hash = Some(hash);
            self.set_state(SaveState::AwaitingApproval { hash });
            self.report(SaveEvent::AwaitingApproval { runner_id, hash });
            self.confirm(
                hash,
                FailureCause::ApprovalTransactionReverted,
                FailureCause::ApprovalTransactionError,
            )
            .await?;
        }

        let hash = self
            .contracts
            .send_set_narrative(runner_id, &request.text, &authorization)
            .await
            .map_err(|e| {
                SaveFailure::from_report(FailureCause::WriteTransactionError, last_hash, e)
            })?;
        self.set_state(SaveState::AwaitingWrite { hash });
        self.report(SaveEvent::AwaitingWrite { runner_id, hash });
        self.confirm(
            hash,
            FailureCause::WriteTransactionReverted,
            FailureCause::WriteTransactionError,
        )
        .await?;
        Ok(hash)
    }

    async fn confirm(
        &self,
        hash: TxHash,
        reverted: FailureCause,
        errored: FailureCause,
    ) -> Result<(), SaveFailure> {
        let receipt = self
            .contracts
            .wait_for_receipt(hash)
            .await
            .map_err(|e| SaveFailure::from_report(errored, Some(hash), e))?;
        if receipt.status {
            Ok(())
        } else {
            Err(SaveFailure::new(
                reverted,
                Some(hash),
                "Transaction Failed",
            ))
        }
    }

    /// Claims the sequencer for a new submission. A finished submission
    /// passes back through `Idle` here.
    fn try_begin(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_in_flight() {
            return false;
        }
        *state = SaveState::Saving;
        true
    }

    /// Drops a terminal state back to `Idle`; an in-flight save is left alone.
    fn clear_finished(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.is_in_flight() {
            *state = SaveState::Idle;
        }
    }

    fn set_state(&self, next: SaveState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn report(&self, event: SaveEvent) {
        if self.events.send(event).is_err() {
            warn!("save event receiver dropped");
        }
    }
}
