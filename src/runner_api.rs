use crate::runner::{
    AttributeValue,
    Authorization,
    Runner,
    RunnerId,
};
use alloy::primitives::{
    Address,
    Bytes,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    str::FromStr,
};

pub const DEFAULT_SIGNER_URL: &str = "https://2112signer.sirsean.workers.dev";

/// Source of the off-chain signature the narrative contract demands.
pub trait Authorizer: Send + Sync {
    fn authorization(
        &self,
        runner_id: RunnerId,
    ) -> impl Future<Output = Result<Authorization>> + Send;
}

#[derive(Clone)]
pub struct RunnerApiClient {
    lookup_url: String,
    signer_url: String,
    http: reqwest::Client,
}

impl RunnerApiClient {
    pub fn new(
        lookup_url: impl Into<String>,
        signer_url: impl Into<String>,
    ) -> Result<Self> {
        let lookup_url = lookup_url.into().trim_end_matches('/').to_string();
        let signer_url = signer_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .wrap_err("failed to build HTTP client for runner lookups")?;
        Ok(Self {
            lookup_url,
            signer_url,
            http,
        })
    }

    pub async fn lookup_runner(&self, runner_id: RunnerId) -> Result<Option<Runner>> {
        let url = format!("{}/runner/{}", self.lookup_url, runner_id);
        let res = self
            .http
            .get(url)
            .send()
            .await
            .wrap_err("runner lookup request failed")?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .wrap_err("failed to read runner lookup response body")?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(eyre!(
                "lookup service responded with {status} for runner {runner_id}: {body}"
            ));
        }
        let dto: RunnerDto = serde_json::from_slice(&bytes)
            .wrap_err("invalid runner lookup payload")?;
        dto.try_into().map(Some)
    }

    async fn fetch_authorization(&self, runner_id: RunnerId) -> Result<Authorization> {
        let url = format!("{}/runner/{}", self.signer_url, runner_id);
        let res = self
            .http
            .get(url)
            .send()
            .await
            .wrap_err("signer request failed")?;
        let status = res.status();
        if !status.is_success() {
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable body>".to_string());
            return Err(eyre!(
                "signer responded with {status} for runner {runner_id}: {body}"
            ));
        }
        let dto: AuthorizationDto = res
            .json()
            .await
            .wrap_err("invalid signer payload")?;
        dto.try_into()
    }
}

impl Authorizer for RunnerApiClient {
    async fn authorization(&self, runner_id: RunnerId) -> Result<Authorization> {
        self.fetch_authorization(runner_id).await
    }
}

impl fmt::Display for RunnerApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lookup {} | signer {}", self.lookup_url, self.signer_url)
    }
}

#[derive(Deserialize)]
struct RunnerDto {
    id: IdDto,
    owner: String,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeDto>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    narrative: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdDto {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AttributeDto {
    Number(serde_json::Number),
    Text(String),
    Other(serde_json::Value),
}

#[derive(Deserialize)]
struct AuthorizationDto {
    timestamp: u64,
    signature: String,
}

impl TryFrom<IdDto> for RunnerId {
    type Error = color_eyre::Report;

    fn try_from(value: IdDto) -> Result<Self> {
        match value {
            IdDto::Number(id) => Ok(RunnerId(id)),
            IdDto::Text(raw) => raw.parse(),
        }
    }
}

impl From<AttributeDto> for AttributeValue {
    fn from(value: AttributeDto) -> Self {
        match value {
            AttributeDto::Number(number) => AttributeValue::Number(number),
            AttributeDto::Text(text) => AttributeValue::Text(text),
            AttributeDto::Other(value) => AttributeValue::Text(value.to_string()),
        }
    }
}

impl TryFrom<RunnerDto> for Runner {
    type Error = color_eyre::Report;

    fn try_from(dto: RunnerDto) -> Result<Self> {
        let owner = Address::from_str(dto.owner.trim())
            .wrap_err_with(|| format!("invalid owner address '{}'", dto.owner))?;
        Ok(Runner {
            id: dto.id.try_into()?,
            owner,
            attributes: dto
                .attributes
                .into_iter()
                .map(|(name, value)| (name, value.into()))
                .collect(),
            narrative: dto.narrative.filter(|text| !text.is_empty()),
            image: dto.image,
        })
    }
}

impl TryFrom<AuthorizationDto> for Authorization {
    type Error = color_eyre::Report;

    fn try_from(dto: AuthorizationDto) -> Result<Self> {
        let raw = dto.signature.trim();
        let hex_digits = raw.strip_prefix("0x").unwrap_or(raw);
        let signature = hex::decode(hex_digits)
            .wrap_err("signer returned a signature that is not hex")?;
        if signature.is_empty() {
            return Err(eyre!("signer returned an empty signature"));
        }
        Ok(Authorization {
            timestamp: dto.timestamp,
            signature: Bytes::from(signature),
        })
    }
}
