#![allow(non_snake_case)]
use alloy::primitives::U256;
use bio_runner::{
    runner::RunnerId,
    sequencer::{
        FailureCause,
        SaveEvent,
        SaveSequencer,
        SaveState,
        SubmitOutcome,
    },
    store::{
        TransactionState,
        ViewEvent,
        ViewState,
    },
    test_helpers::{
        AUTHORIZATION_TIMESTAMP,
        ContractCall,
        FakeAuthorizer,
        FakeContracts,
        narrative_address,
        owner_address,
        runner,
    },
};
use tokio::sync::mpsc;

struct Harness {
    authorizer: FakeAuthorizer,
    contracts: FakeContracts,
    sequencer: SaveSequencer<FakeAuthorizer, FakeContracts>,
    events: mpsc::UnboundedReceiver<SaveEvent>,
    view: ViewState,
}

impl Harness {
    fn new(contracts: FakeContracts, narrative: Option<&str>) -> Self {
        let authorizer = FakeAuthorizer::new();
        let (tx, events) = mpsc::unbounded_channel();
        let sequencer = SaveSequencer::new(authorizer.clone(), contracts.clone(), tx);
        let mut view = ViewState::default();
        view.apply(ViewEvent::Connected {
            address: owner_address(),
            cost: None,
        });
        view.apply(ViewEvent::RunnerRequested(RunnerId(42)));
        view.apply(ViewEvent::RunnerLoaded(runner(42, owner_address(), narrative)));
        Self {
            authorizer,
            contracts,
            sequencer,
            events,
            view,
        }
    }

    async fn save(&mut self, text: &str) -> SubmitOutcome {
        let request = self.view.save_request(text.to_string()).unwrap();
        let outcome = self.sequencer.submit(request).await;
        while let Ok(event) = self.events.try_recv() {
            self.view.apply(ViewEvent::Save(event));
        }
        outcome
    }
}

#[tokio::test]
async fn save__runner_42_with_cost_approves_then_writes_hello() {
    // given
    let contracts = FakeContracts::new().with_cost(U256::from(1000));
    let mut harness = Harness::new(contracts, Some(""));

    // when
    let outcome = harness.save("Hello").await;

    // then
    let authorization = harness.authorizer.authorization_for(RunnerId(42));
    let approve_hash = match harness.contracts.calls().as_slice() {
        [
            ContractCall::Cost,
            ContractCall::Approve { spender, amount },
            ContractCall::WaitForReceipt(approve_hash),
            ContractCall::SetNarrative {
                runner_id,
                text,
                timestamp,
                signature,
            },
            ContractCall::WaitForReceipt(_),
        ] => {
            assert_eq!(*spender, narrative_address());
            assert_eq!(*amount, U256::from(1000));
            assert_eq!(*runner_id, RunnerId(42));
            assert_eq!(text, "Hello");
            assert_eq!(*timestamp, AUTHORIZATION_TIMESTAMP);
            assert_eq!(*signature, authorization.signature);
            *approve_hash
        }
        other => panic!("unexpected calls {other:?}"),
    };
    assert_eq!(harness.authorizer.requests(), vec![RunnerId(42)]);
    let write_hash = harness.contracts.last_sent_hash().unwrap();
    assert_ne!(approve_hash, write_hash);
    assert_eq!(outcome, SubmitOutcome::Succeeded { hash: write_hash });
    assert_eq!(
        harness.sequencer.state(),
        SaveState::Succeeded { hash: write_hash }
    );
    assert_eq!(harness.view.current_narrative(), Some("Hello"));
    assert_eq!(harness.view.pending_narrative, None);
    assert_eq!(harness.view.tx, TransactionState::None);
}

#[tokio::test]
async fn save__runner_42_without_cost_sends_a_single_write() {
    // given
    let contracts = FakeContracts::new().with_cost(U256::ZERO);
    let mut harness = Harness::new(contracts, None);

    // when
    let outcome = harness.save("World").await;

    // then
    let authorization = harness.authorizer.authorization_for(RunnerId(42));
    assert_eq!(
        harness.contracts.transactions(),
        vec![ContractCall::SetNarrative {
            runner_id: RunnerId(42),
            text: "World".to_string(),
            timestamp: authorization.timestamp,
            signature: authorization.signature,
        }]
    );
    assert!(matches!(outcome, SubmitOutcome::Succeeded { .. }));
    assert_eq!(harness.view.current_narrative(), Some("World"));
    assert_eq!(
        harness.contracts.stored_narrative(RunnerId(42)).as_deref(),
        Some("World")
    );
}

#[tokio::test]
async fn save__reverted_approval_fails_without_writing() {
    // given
    let contracts = FakeContracts::new()
        .with_cost(U256::from(1000))
        .with_approval_status(false);
    let mut harness = Harness::new(contracts, Some("before"));

    // when
    let outcome = harness.save("after").await;

    // then
    let failure = match outcome {
        SubmitOutcome::Failed(failure) => failure,
        other => panic!("expected failure, got {other:?}"),
    };
    assert_eq!(failure.cause, FailureCause::ApprovalTransactionReverted);
    assert!(
        !harness
            .contracts
            .calls()
            .iter()
            .any(|call| matches!(call, ContractCall::SetNarrative { .. }))
    );
    assert!(matches!(harness.sequencer.state(), SaveState::Failed(_)));
    assert_eq!(harness.view.current_narrative(), Some("before"));
    assert_eq!(harness.view.editor_seed(), "after");
    assert!(harness.view.tx_error().is_some());
    assert!(harness.view.can_edit());
}

#[tokio::test]
async fn save__unchanged_text_is_a_no_op() {
    // given
    let contracts = FakeContracts::new().with_cost(U256::from(1000));
    let mut harness = Harness::new(contracts, Some("same"));

    // when
    let outcome = harness.save("same").await;

    // then
    assert_eq!(outcome, SubmitOutcome::Unchanged);
    assert!(harness.contracts.calls().is_empty());
    assert!(harness.authorizer.requests().is_empty());
    assert_eq!(harness.sequencer.state(), SaveState::Idle);
}

#[tokio::test]
async fn save__retry_after_reverted_write_succeeds() {
    // given
    let contracts = FakeContracts::new().with_write_status(false);
    let mut harness = Harness::new(contracts.clone(), None);
    let first = harness.save("draft").await;
    assert!(matches!(
        first,
        SubmitOutcome::Failed(ref failure)
            if failure.cause == FailureCause::WriteTransactionReverted
    ));

    // when
    contracts.set_write_status(true);
    let seed = harness.view.editor_seed();
    let second = harness.save(&seed).await;

    // then
    assert!(matches!(second, SubmitOutcome::Succeeded { .. }));
    assert_eq!(harness.view.current_narrative(), Some("draft"));
    assert_eq!(harness.authorizer.requests(), vec![RunnerId(42), RunnerId(42)]);
}
