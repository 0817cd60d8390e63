use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One HTTP request forwarded by the relay to be executed locally.
///
/// `body` is absent for bodyless requests (GET, HEAD, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRequest {
    pub id: String,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// The local service's answer to a [`TunnelRequest`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelResponse {
    pub id: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Messages sent from client to relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Register {
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subdomain: Option<String>,
    },
    Tunnel {
        data: TunnelResponse,
    },
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Registered {
        url: String,
    },
    Tunnel {
        data: TunnelRequest,
    },
    Error {
        message: String,
    },
}

impl ClientMessage {
    pub fn register(port: u16, subdomain: Option<&str>) -> Self {
        ClientMessage::Register {
            port,
            subdomain: subdomain.map(str::to_string),
        }
    }

    pub fn tunnel_response(data: TunnelResponse) -> Self {
        ClientMessage::Tunnel { data }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
