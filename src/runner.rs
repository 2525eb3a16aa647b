use alloy::primitives::{
    Address,
    Bytes,
    U256,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RunnerId(pub u64);

impl RunnerId {
    pub fn as_u256(self) -> U256 {
        U256::from(self.0)
    }
}

impl FromStr for RunnerId {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let id = trimmed
            .parse::<u64>()
            .wrap_err_with(|| format!("'{trimmed}' is not a valid runner id"))?;
        Ok(RunnerId(id))
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(text) => write!(f, "{text}"),
            AttributeValue::Number(number) => write!(f, "{number}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Runner {
    pub id: RunnerId,
    pub owner: Address,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Markdown, shown verbatim.
    pub narrative: Option<String>,
    pub image: Option<String>,
}

impl Runner {
    pub fn narrative_text(&self) -> &str {
        self.narrative.as_deref().unwrap_or("")
    }
}

/// Time-stamped approval from the off-chain signer, valid for one runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub timestamp: u64,
    pub signature: Bytes,
}
