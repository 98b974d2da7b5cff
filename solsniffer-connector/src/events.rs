//! JSON-RPC envelopes exchanged with the streaming endpoint.

use crate::error::{Result, SnifferError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// The subscription methods the streaming endpoint understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionAction {
    LogsSubscribe,
    LogsUnsubscribe,
    ProgramSubscribe,
    ProgramUnsubscribe,
}

impl SubscriptionAction {
    pub fn method(self) -> &'static str {
        match self {
            SubscriptionAction::LogsSubscribe => "logsSubscribe",
            SubscriptionAction::LogsUnsubscribe => "logsUnsubscribe",
            SubscriptionAction::ProgramSubscribe => "programSubscribe",
            SubscriptionAction::ProgramUnsubscribe => "programUnsubscribe",
        }
    }

    pub fn is_subscribe(self) -> bool {
        matches!(
            self,
            SubscriptionAction::LogsSubscribe | SubscriptionAction::ProgramSubscribe
        )
    }

    pub fn is_unsubscribe(self) -> bool {
        !self.is_subscribe()
    }

    /// Maps a subscribe method to the method that cancels it.
    pub fn counterpart(self) -> SubscriptionAction {
        match self {
            SubscriptionAction::LogsSubscribe => SubscriptionAction::LogsUnsubscribe,
            SubscriptionAction::LogsUnsubscribe => SubscriptionAction::LogsSubscribe,
            SubscriptionAction::ProgramSubscribe => SubscriptionAction::ProgramUnsubscribe,
            SubscriptionAction::ProgramUnsubscribe => SubscriptionAction::ProgramSubscribe,
        }
    }
}

impl fmt::Display for SubscriptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// The server-assigned id of an active subscription.
///
/// Solana nodes answer with an integer; other gateways use strings. The raw
/// JSON value is kept so that unsubscribe echoes it back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionId(Value);

impl SubscriptionId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(value.clone())),
            Value::Number(_) => Some(Self(value.clone())),
            _ => None,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self(Value::String(id.to_string()))
    }
}

impl From<u64> for SubscriptionId {
    fn from(id: u64) -> Self {
        Self(Value::from(id))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// `{"jsonrpc":"2.0","id":..,"method":..,"params":[{"mentions":["any"]}]}`
    pub fn subscribe(id: u64, action: SubscriptionAction) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: action.method(),
            params: vec![json!({ "mentions": ["any"] })],
        }
    }

    pub fn unsubscribe(id: u64, action: SubscriptionAction, subscription: &SubscriptionId) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: action.method(),
            params: vec![subscription.as_value().clone()],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Any frame received from the endpoint: a response carries `id`, a notification `method`.
#[derive(Debug, Deserialize)]
pub struct RpcFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcFrame {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SnifferError::InvalidMessage(format!("not a JSON-RPC frame: {}", e)))
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Extracts the subscription id from `{result:{subscription:id}}` or a bare `{result:id}`.
    pub fn subscription_id(&self) -> Result<SubscriptionId> {
        if let Some(err) = &self.error {
            return Err(SnifferError::Protocol(format!(
                "subscription rejected ({}): {}",
                err.code, err.message
            )));
        }
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| SnifferError::Protocol("response has no result".to_string()))?;
        let id = result.get("subscription").unwrap_or(result);
        SubscriptionId::from_value(id).ok_or_else(|| {
            SnifferError::Protocol(format!("response carries no subscription id: {}", result))
        })
    }
}

/// Returns the transaction signature referenced by a live notification.
///
/// `Ok(None)` means the frame is not a notification (e.g. a late response) and can be ignored.
pub fn parse_notification_signature(bytes: &[u8]) -> Result<Option<String>> {
    let frame = RpcFrame::parse(bytes)?;
    if !frame.is_notification() {
        return Ok(None);
    }
    let result = frame
        .params
        .as_ref()
        .and_then(|params| params.get("result"))
        .ok_or_else(|| SnifferError::InvalidMessage("notification has no params.result".to_string()))?;

    let signature = result
        .get("signature")
        .or_else(|| result.get("value").and_then(|value| value.get("signature")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SnifferError::InvalidMessage("notification carries no signature".to_string()))?;

    Ok(Some(signature.to_string()))
}
