//! Access node endpoints and URL building.

use std::fmt;
use std::str::FromStr;

use chainwatch_core::SubscriptionRequest;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FlowError;

/// Public Flow networks with well-known access nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowNetwork {
    Mainnet,
    Testnet,
    #[default]
    Previewnet,
}

impl FlowNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Previewnet => "previewnet",
        }
    }

    /// REST and WebSocket endpoints of the public access node.
    pub fn endpoints(&self) -> Result<FlowEndpoints, FlowError> {
        let host = format!("rest-{}.onflow.org", self.as_str());
        FlowEndpoints::new(&format!("https://{host}"), &format!("wss://{host}"))
    }
}

impl fmt::Display for FlowNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowNetwork {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "previewnet" => Ok(Self::Previewnet),
            other => Err(FlowError::UnknownNetwork(other.to_string())),
        }
    }
}

/// REST base URL (for block queries) and WebSocket base URL (for streams).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEndpoints {
    rest: Url,
    ws: Url,
}

impl FlowEndpoints {
    pub fn new(rest: &str, ws: &str) -> Result<Self, FlowError> {
        let rest = parse_base(rest, &["http", "https"])?;
        let ws = parse_base(ws, &["ws", "wss"])?;
        Ok(Self { rest, ws })
    }

    pub fn rest(&self) -> &Url {
        &self.rest
    }

    pub fn ws(&self) -> &Url {
        &self.ws
    }

    /// `GET` target for the latest sealed block.
    pub fn sealed_block_url(&self) -> Url {
        let mut url = join(&self.rest, "v1/blocks");
        url.query_pairs_mut().append_pair("height", "sealed");
        url
    }

    /// WebSocket target for an event subscription.
    pub fn subscribe_url(&self, request: &SubscriptionRequest) -> Url {
        let mut url = join(&self.ws, "v1/subscribe_events");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("start_height", &request.start_height().to_string());
            if !request.filter().is_empty() {
                let types: Vec<&str> = request.filter().event_types().collect();
                query.append_pair("event_types", &types.join(","));
            }
            query.append_pair(
                "heartbeat_interval",
                &request.heartbeat_interval().to_string(),
            );
        }
        url
    }
}

fn parse_base(raw: &str, schemes: &[&str]) -> Result<Url, FlowError> {
    let invalid = |reason: String| FlowError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(format!(
            "scheme must be one of {}",
            schemes.join(", ")
        )));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base URL".into()));
    }
    Ok(url)
}

/// Append `path` to the base path, keeping any prefix the base carries.
fn join(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/{path}"));
    url.set_query(None);
    url
}
