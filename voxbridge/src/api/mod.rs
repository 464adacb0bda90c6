//! Call creation against the hosted API.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// What the call should talk to. Exactly one selector must be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    pub assistant_id: Option<String>,
    pub assistant: Option<Value>,
    pub assistant_overrides: Option<Value>,
    pub squad_id: Option<String>,
    pub squad: Option<Value>,
}

impl StartOptions {
    pub fn assistant_id(id: impl Into<String>) -> Self {
        Self {
            assistant_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn assistant(assistant: Value) -> Self {
        Self {
            assistant: Some(assistant),
            ..Self::default()
        }
    }

    pub fn squad_id(id: impl Into<String>) -> Self {
        Self {
            squad_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn squad(squad: Value) -> Self {
        Self {
            squad: Some(squad),
            ..Self::default()
        }
    }

    pub fn with_overrides(mut self, overrides: Value) -> Self {
        self.assistant_overrides = Some(overrides);
        self
    }

    /// Resolve the single call target. Fails without touching the network
    /// when no selector or more than one is set.
    pub fn into_target(self) -> Result<CallTarget> {
        let selected = [
            self.assistant_id.is_some(),
            self.assistant.is_some(),
            self.squad_id.is_some(),
            self.squad.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        match selected {
            0 => return Err(Error::Configuration("No assistant specified".into())),
            1 => {}
            _ => {
                return Err(Error::Configuration(
                    "Specify exactly one of assistant_id, assistant, squad_id or squad".into(),
                ));
            }
        }
        let overrides = self.assistant_overrides;
        if overrides.is_some() && (self.squad_id.is_some() || self.squad.is_some()) {
            tracing::warn!("Ignoring assistant overrides for a squad call");
        }
        let target = if let Some(id) = self.assistant_id {
            CallTarget::AssistantId { id, overrides }
        } else if let Some(assistant) = self.assistant {
            CallTarget::Assistant {
                assistant,
                overrides,
            }
        } else if let Some(id) = self.squad_id {
            CallTarget::SquadId(id)
        } else if let Some(squad) = self.squad {
            CallTarget::Squad(squad)
        } else {
            return Err(Error::Configuration("No assistant specified".into()));
        };
        Ok(target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    AssistantId { id: String, overrides: Option<Value> },
    Assistant { assistant: Value, overrides: Option<Value> },
    SquadId(String),
    Squad(Value),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWebCall<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant_overrides: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    squad_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    squad: Option<&'a Value>,
}

impl<'a> From<&'a CallTarget> for CreateWebCall<'a> {
    fn from(target: &'a CallTarget) -> Self {
        let mut body = CreateWebCall {
            assistant_id: None,
            assistant: None,
            assistant_overrides: None,
            squad_id: None,
            squad: None,
        };
        match target {
            CallTarget::AssistantId { id, overrides } => {
                body.assistant_id = Some(id.as_str());
                body.assistant_overrides = overrides.as_ref();
            }
            CallTarget::Assistant {
                assistant,
                overrides,
            } => {
                body.assistant = Some(assistant);
                body.assistant_overrides = overrides.as_ref();
            }
            CallTarget::SquadId(id) => body.squad_id = Some(id.as_str()),
            CallTarget::Squad(squad) => body.squad = Some(squad),
        }
        body
    }
}

/// A created web call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInfo {
    pub id: String,
    pub web_call_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedCall {
    #[serde(default)]
    id: String,
    web_call_url: Option<String>,
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub async fn create_web_call(&self, target: &CallTarget) -> Result<CallInfo> {
        let url = format!("{}/call/web", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&CreateWebCall::from(target))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::CallCreation {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }

        let created: CreatedCall = response.json().await?;
        match created.web_call_url {
            Some(web_call_url) if !web_call_url.is_empty() => {
                tracing::info!(call_id = %created.id, "Created web call");
                Ok(CallInfo {
                    id: created.id,
                    web_call_url,
                })
            }
            _ => Err(Error::CallCreation {
                status: status.as_u16(),
                message: "unable to create call".into(),
            }),
        }
    }
}

/// The server's `message` field (a string or a list of strings), falling
/// back to the raw body.
fn error_message(body: &str, status: StatusCode) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").cloned());
    match message {
        Some(Value::String(message)) => message,
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        _ if !body.is_empty() => body.to_string(),
        _ => status.to_string(),
    }
}
