use crate::runner::{
    Authorization,
    RunnerId,
};
use alloy::{
    network::EthereumWallet,
    primitives::{
        Address,
        TxHash,
        U256,
    },
    providers::{
        DynProvider,
        PendingTransactionBuilder,
        Provider,
        ProviderBuilder,
    },
    signers::local::PrivateKeySigner,
    sol,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::future::Future;

sol! {
    #[sol(rpc)]
    interface IRunnerNarrative {
        function cost() external view returns (uint256);
        function data() external view returns (address);
        function narrative(uint256 runnerId) external view returns (string);
        function setNarrative(uint256 runnerId, string text, uint256 timestamp, bytes signature) external;
    }

    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    /// `false` when the chain reported status `0`.
    pub status: bool,
}

/// The calls the save flow needs from the narrative contract and the token
/// contract behind it.
pub trait NarrativeContracts: Send + Sync {
    /// Address transactions are sent from.
    fn account(&self) -> Address;

    /// Spender for the token allowance.
    fn narrative_address(&self) -> Address;

    fn cost(&self) -> impl Future<Output = Result<U256>> + Send;

    fn narrative(&self, runner_id: RunnerId) -> impl Future<Output = Result<String>> + Send;

    fn send_approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    fn send_set_narrative(
        &self,
        runner_id: RunnerId,
        text: &str,
        authorization: &Authorization,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Resolves once the transaction is mined. There is no timeout.
    fn wait_for_receipt(&self, hash: TxHash)
    -> impl Future<Output = Result<TxReceipt>> + Send;
}

#[derive(Clone)]
pub struct EvmContracts {
    provider: DynProvider,
    account: Address,
    narrative: IRunnerNarrative::IRunnerNarrativeInstance<DynProvider>,
    token: IERC20::IERC20Instance<DynProvider>,
}

/// Builds a signing provider for `signer` and resolves the token contract
/// through the narrative contract's `data()`.
pub async fn connect(
    rpc_url: &str,
    narrative_address: Address,
    signer: PrivateKeySigner,
) -> Result<EvmContracts> {
    let url: reqwest::Url = rpc_url
        .parse()
        .wrap_err_with(|| format!("invalid RPC URL {rpc_url}"))?;
    let account = signer.address();
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(url)
        .erased();
    let chain_id = provider
        .get_chain_id()
        .await
        .wrap_err_with(|| format!("failed to reach RPC endpoint at {rpc_url}"))?;
    tracing::info!(%account, chain_id, "connected to chain");

    let narrative = IRunnerNarrative::new(narrative_address, provider.clone());
    let token_address = narrative
        .data()
        .call()
        .await
        .wrap_err("failed to resolve token contract via data()")?;
    tracing::info!(%narrative_address, %token_address, "resolved contracts");
    let token = IERC20::new(token_address, provider.clone());

    Ok(EvmContracts {
        provider,
        account,
        narrative,
        token,
    })
}

impl NarrativeContracts for EvmContracts {
    fn account(&self) -> Address {
        self.account
    }

    fn narrative_address(&self) -> Address {
        *self.narrative.address()
    }

    async fn cost(&self) -> Result<U256> {
        self.narrative
            .cost()
            .call()
            .await
            .wrap_err("failed to read narrative cost")
    }

    async fn narrative(&self, runner_id: RunnerId) -> Result<String> {
        self.narrative
            .narrative(runner_id.as_u256())
            .call()
            .await
            .wrap_err_with(|| format!("failed to read narrative for runner {runner_id}"))
    }

    async fn send_approve(&self, spender: Address, amount: U256) -> Result<TxHash> {
        let pending = self
            .token
            .approve(spender, amount)
            .send()
            .await
            .wrap_err("approve transaction was not accepted")?;
        Ok(*pending.tx_hash())
    }

    async fn send_set_narrative(
        &self,
        runner_id: RunnerId,
        text: &str,
        authorization: &Authorization,
    ) -> Result<TxHash> {
        let pending = self
            .narrative
            .setNarrative(
                runner_id.as_u256(),
                text.to_owned(),
                U256::from(authorization.timestamp),
                authorization.signature.clone(),
            )
            .send()
            .await
            .wrap_err("setNarrative transaction was not accepted")?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt> {
        let receipt =
            PendingTransactionBuilder::new(self.provider.root().clone(), hash)
                .get_receipt()
                .await
                .wrap_err_with(|| format!("failed waiting for receipt of {hash}"))?;
        Ok(TxReceipt {
            transaction_hash: receipt.transaction_hash,
            status: receipt.status(),
        })
    }
}
