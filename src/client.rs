use crate::{
    contracts::{
        self,
        EvmContracts,
        NarrativeContracts,
    },
    deployment::ResolvedDeployment,
    runner::RunnerId,
    runner_api::{
        Authorizer,
        RunnerApiClient,
    },
    sequencer::{
        SaveEvent,
        SaveSequencer,
        SubmitOutcome,
    },
    store::{
        ViewEvent,
        ViewState,
    },
    ui,
    wallets::{
        self,
        WalletDescriptor,
    },
};
use alloy::signers::local::PrivateKeySigner;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub deployment: ResolvedDeployment,
    pub lookup_url: String,
    pub signer_url: String,
    /// Keystore to sign with; `None` runs the client read-only.
    pub wallet: Option<WalletDescriptor>,
    pub initial_runner: Option<RunnerId>,
}

pub struct AppController<A = RunnerApiClient, C = EvmContracts> {
    pub view: ViewState,
    api: RunnerApiClient,
    sequencer: Option<Arc<SaveSequencer<A, C>>>,
    explorer_url: String,
    view_events: mpsc::UnboundedSender<ViewEvent>,
}

impl AppController {
    pub async fn from_config(
        config: &AppConfig,
        signer: Option<PrivateKeySigner>,
        view_events: mpsc::UnboundedSender<ViewEvent>,
        save_events: mpsc::UnboundedSender<SaveEvent>,
    ) -> Result<Self> {
        let api = RunnerApiClient::new(&config.lookup_url, &config.signer_url)?;
        tracing::info!(%api, "runner services configured");
        let explorer_url = config.deployment.explorer_url.clone();

        match signer {
            Some(signer) => {
                let chain = contracts::connect(
                    &config.deployment.rpc_url,
                    config.deployment.narrative_contract,
                    signer,
                )
                .await
                .wrap_err("failed to connect wallet")?;
                let authorizer = api.clone();
                Ok(Self::connected(
                    api,
                    explorer_url,
                    authorizer,
                    chain,
                    view_events,
                    save_events,
                )
                .await)
            }
            None => Ok(Self::read_only(api, explorer_url, view_events)),
        }
    }
}

impl<A, C> AppController<A, C>
where
    A: Authorizer + 'static,
    C: NarrativeContracts + Clone + 'static,
{
    pub fn read_only(
        api: RunnerApiClient,
        explorer_url: impl Into<String>,
        view_events: mpsc::UnboundedSender<ViewEvent>,
    ) -> Self {
        tracing::info!("no wallet selected; running read-only");
        let mut view = ViewState::default();
        view.apply(ViewEvent::Status(String::from(
            "Read-only: pass --wallet <name> to edit narratives",
        )));
        Self {
            view,
            api,
            sequencer: None,
            explorer_url: explorer_url.into(),
            view_events,
        }
    }

    pub async fn connected(
        api: RunnerApiClient,
        explorer_url: impl Into<String>,
        authorizer: A,
        chain: C,
        view_events: mpsc::UnboundedSender<ViewEvent>,
        save_events: mpsc::UnboundedSender<SaveEvent>,
    ) -> Self {
        let cost = match chain.cost().await {
            Ok(cost) => Some(cost),
            Err(e) => {
                tracing::warn!(error = %e, "could not read narrative cost");
                None
            }
        };
        let mut view = ViewState::default();
        view.apply(ViewEvent::Connected {
            address: chain.account(),
            cost,
        });
        Self {
            view,
            api,
            sequencer: Some(Arc::new(SaveSequencer::new(authorizer, chain, save_events))),
            explorer_url: explorer_url.into(),
            view_events,
        }
    }

    pub fn explorer_url(&self) -> &str {
        &self.explorer_url
    }

    pub fn apply(&mut self, event: ViewEvent) {
        self.view.apply(event);
    }

    pub fn on_save_event(&mut self, event: SaveEvent) {
        if matches!(event, SaveEvent::Succeeded { .. }) {
            self.refresh_cost();
        }
        self.view.apply(ViewEvent::Save(event));
    }

    /// Starts the lookup service request and, when connected, the on-chain
    /// narrative read. Both answer through the view channel.
    pub fn lookup(&mut self, id: RunnerId) {
        self.view.apply(ViewEvent::RunnerRequested(id));

        let api = self.api.clone();
        let tx = self.view_events.clone();
        tokio::spawn(async move {
            let event = match api.lookup_runner(id).await {
                Ok(Some(runner)) => ViewEvent::RunnerLoaded(runner),
                Ok(None) => ViewEvent::RunnerNotFound(id),
                Err(e) => {
                    tracing::error!(runner_id = %id, error = %e, "runner lookup failed");
                    ViewEvent::RunnerLookupFailed {
                        id,
                        error: format!("{e:#}"),
                    }
                }
            };
            let _ = tx.send(event);
        });

        if let Some(sequencer) = &self.sequencer {
            let chain = sequencer.contracts().clone();
            let tx = self.view_events.clone();
            tokio::spawn(async move {
                match chain.narrative(id).await {
                    Ok(text) => {
                        let _ = tx.send(ViewEvent::NarrativeLoaded { id, text });
                    }
                    Err(e) => {
                        tracing::warn!(runner_id = %id, error = %e, "on-chain narrative read failed");
                    }
                }
            });
        }
    }

    pub fn save(&mut self, text: String) {
        let Some(sequencer) = self.sequencer.clone() else {
            self.view.apply(ViewEvent::Status(String::from(
                "Connect a wallet to save narratives",
            )));
            return;
        };
        let Some(request) = self.view.save_request(text) else {
            self.view.apply(ViewEvent::Status(String::from(
                "Only the owner of this runner can edit its narrative",
            )));
            return;
        };
        if request.is_unchanged() {
            self.view
                .apply(ViewEvent::Status(String::from("Narrative unchanged")));
            return;
        }
        let tx = self.view_events.clone();
        tokio::spawn(async move {
            let runner_id = request.runner_id;
            match sequencer.submit(request).await {
                SubmitOutcome::Succeeded { hash } => {
                    tracing::info!(%runner_id, %hash, "narrative saved");
                }
                SubmitOutcome::Failed(failure) => {
                    tracing::warn!(%runner_id, %failure, "narrative save failed");
                }
                SubmitOutcome::Busy => {
                    let _ = tx.send(ViewEvent::Status(format!(
                        "A save is already in progress; ignored the save for runner {runner_id}"
                    )));
                }
                SubmitOutcome::Unchanged => {
                    let _ = tx.send(ViewEvent::Status(String::from("Narrative unchanged")));
                }
            }
        });
    }

    fn refresh_cost(&self) {
        let Some(sequencer) = &self.sequencer else {
            return;
        };
        let chain = sequencer.contracts().clone();
        let tx = self.view_events.clone();
        tokio::spawn(async move {
            match chain.cost().await {
                Ok(cost) => {
                    let _ = tx.send(ViewEvent::CostUpdated(cost));
                }
                Err(e) => tracing::warn!(error = %e, "cost refresh failed"),
            }
        });
    }

    fn handle_user_event(&mut self, event: ui::UserEvent) {
        match event {
            ui::UserEvent::Search(id) => self.lookup(id),
            ui::UserEvent::InvalidSearch(input) => {
                self.view.apply(ViewEvent::Status(format!(
                    "'{input}' is not a valid runner id"
                )));
            }
            ui::UserEvent::SaveNarrative(text) => self.save(text),
            ui::UserEvent::DismissError => self.view.apply(ViewEvent::DismissError),
            ui::UserEvent::Redraw | ui::UserEvent::Quit => {}
        }
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    // Password prompt needs the cooked terminal.
    let signer = match &config.wallet {
        Some(descriptor) => Some(wallets::unlock_wallet(descriptor)?),
        None => None,
    };

    let (view_tx, view_rx) = mpsc::unbounded_channel();
    let (save_tx, save_rx) = mpsc::unbounded_channel();
    let mut controller =
        AppController::from_config(&config, signer, view_tx, save_tx).await?;
    if let Some(id) = config.initial_runner {
        controller.lookup(id);
    }

    let mut ui_state = ui::UiState::new(controller.explorer_url());
    let mut input_events = ui::input_event_stream();

    tracing::info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(
        &mut controller,
        &mut ui_state,
        &mut input_events,
        view_rx,
        save_rx,
    )
    .await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<A, C>(
    controller: &mut AppController<A, C>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    mut view_rx: mpsc::UnboundedReceiver<ViewEvent>,
    mut save_rx: mpsc::UnboundedReceiver<SaveEvent>,
) -> Result<()>
where
    A: Authorizer + 'static,
    C: NarrativeContracts + Clone + 'static,
{
    tracing::info!("Running app loop");
    ui::draw(ui_state, &controller.view)?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => { break; }
            Some(event) = view_rx.recv() => controller.apply(event),
            Some(event) = save_rx.recv() => controller.on_save_event(event),
            raw = ui::next_raw_event(input_events) => {
                let raw = raw.wrap_err("reading terminal input failed")?;
                match ui::interpret_event(ui_state, &controller.view, raw) {
                    Some(ui::UserEvent::Quit) => break,
                    Some(event) => controller.handle_user_event(event),
                    None => continue,
                }
            }
        }
        ui::draw(ui_state, &controller.view).wrap_err("draw failed")?;
    }
    tracing::info!("Leaving app loop");
    Ok(())
}
