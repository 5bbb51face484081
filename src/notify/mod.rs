//! Notification handler registry
//!
//! Handlers are grouped by kind (`discord`, `webhook`, `smtp`) and addressed by name
//! within their kind. The registry is built once at startup from the
//! configuration and shared by `Arc` between the AlertActor, which dispatches
//! alerts through it, and the management API, which edits it.

pub mod discord;
pub mod smtp;
pub mod webhook;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};

use crate::actors::messages::CollectorAlert;
use crate::config::HandlerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Discord,
    Webhook,
    Smtp,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Discord => "discord",
            HandlerKind::Webhook => "webhook",
            HandlerKind::Smtp => "smtp",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(HandlerKind::Discord),
            "webhook" => Ok(HandlerKind::Webhook),
            "smtp" => Ok(HandlerKind::Smtp),
            other => Err(RegistryError::UnknownKind(other.to_string())),
        }
    }
}

/// Body of a create/update request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRequest {
    pub name: String,
    /// Endpoint of `discord` and `webhook` handlers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Discord user to mention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Mail server and addresses of `smtp` handlers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpSettings>,
}

/// A registered handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub kind: HandlerKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Upgrade the connection with STARTTLS before authenticating
    #[serde(default)]
    pub starttls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Never echoed back by the API
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    25
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownKind(String),
    AlreadyExists { kind: HandlerKind, name: String },
    NotFound { kind: HandlerKind, name: String },
    InvalidRequest(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownKind(kind) => write!(f, "not found handler kind with name {kind}"),
            RegistryError::AlreadyExists { kind, name } => {
                write!(f, "{kind} handler '{name}' already exists")
            }
            RegistryError::NotFound { kind, name } => {
                write!(f, "not found {kind} handler with name {name}")
            }
            RegistryError::InvalidRequest(msg) => write!(f, "invalid handler request: {msg}"),
        }
    }
}

impl std::error::Error for RegistryError {}

type Handlers = BTreeMap<HandlerKind, BTreeMap<String, HandlerInfo>>;

#[derive(Debug)]
pub struct NotificationRegistry {
    client: Client,
    handlers: RwLock<Handlers>,
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRegistry {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            handlers: RwLock::new(Handlers::new()),
        }
    }

    /// Registry pre-populated with the handlers of the configuration file
    pub fn from_config(handlers: &[HandlerConfig]) -> Result<Self, RegistryError> {
        let mut map = Handlers::new();
        for handler in handlers {
            let info = validate(handler.kind, &handler.request)?;
            let by_name = map.entry(handler.kind).or_default();
            if by_name.contains_key(&info.name) {
                return Err(RegistryError::AlreadyExists {
                    kind: handler.kind,
                    name: info.name,
                });
            }
            by_name.insert(info.name.clone(), info);
        }

        Ok(Self {
            handlers: RwLock::new(map),
            ..Self::new()
        })
    }

    /// All handlers, or only those of `kind`
    pub async fn list(&self, kind: Option<HandlerKind>) -> Vec<HandlerInfo> {
        let handlers = self.handlers.read().await;
        match kind {
            Some(kind) => handlers
                .get(&kind)
                .map(|by_name| by_name.values().cloned().collect())
                .unwrap_or_default(),
            None => handlers
                .values()
                .flat_map(|by_name| by_name.values().cloned())
                .collect(),
        }
    }

    pub async fn get(&self, kind: HandlerKind, name: &str) -> Result<HandlerInfo, RegistryError> {
        self.handlers
            .read()
            .await
            .get(&kind)
            .and_then(|by_name| by_name.get(name))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    pub async fn create(
        &self,
        kind: HandlerKind,
        request: HandlerRequest,
    ) -> Result<HandlerInfo, RegistryError> {
        let info = validate(kind, &request)?;
        let mut handlers = self.handlers.write().await;
        let by_name = handlers.entry(kind).or_default();

        if by_name.contains_key(&info.name) {
            return Err(RegistryError::AlreadyExists {
                kind,
                name: info.name,
            });
        }

        info!("registered {kind} handler '{}'", info.name);
        by_name.insert(info.name.clone(), info.clone());
        Ok(info)
    }

    pub async fn update(
        &self,
        kind: HandlerKind,
        request: HandlerRequest,
    ) -> Result<HandlerInfo, RegistryError> {
        let info = validate(kind, &request)?;
        let mut handlers = self.handlers.write().await;

        match handlers.get_mut(&kind).and_then(|by_name| by_name.get_mut(&info.name)) {
            Some(existing) => {
                *existing = info.clone();
                info!("updated {kind} handler '{}'", info.name);
                Ok(info)
            }
            None => Err(RegistryError::NotFound {
                kind,
                name: info.name,
            }),
        }
    }

    pub async fn delete(&self, kind: HandlerKind, name: &str) -> Result<(), RegistryError> {
        let mut handlers = self.handlers.write().await;
        match handlers.get_mut(&kind).and_then(|by_name| by_name.remove(name)) {
            Some(_) => {
                info!("removed {kind} handler '{name}'");
                Ok(())
            }
            None => Err(RegistryError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }

    /// Send `alert` to every registered handler
    ///
    /// Returns how many handlers accepted it. Failures are logged only.
    #[instrument(skip_all, fields(alert = alert.kind.title()))]
    pub async fn dispatch(&self, alert: &CollectorAlert) -> usize {
        // don't hold the lock across HTTP requests
        let targets = self.list(None).await;
        if targets.is_empty() {
            debug!("no notification handlers registered");
            return 0;
        }

        let sends = targets.iter().map(|handler| async move {
            let result = match handler.kind {
                HandlerKind::Discord => discord::send_alert(&self.client, handler, alert).await,
                HandlerKind::Webhook => webhook::send_alert(&self.client, handler, alert).await,
                HandlerKind::Smtp => smtp::send_alert(handler, alert).await,
            };
            if let Err(e) = &result {
                error!("failed to notify {} handler '{}': {e:#}", handler.kind, handler.name);
            }
            result.is_ok()
        });

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }
}

fn validate(kind: HandlerKind, request: &HandlerRequest) -> Result<HandlerInfo, RegistryError> {
    if request.name.trim().is_empty() {
        return Err(RegistryError::InvalidRequest("name must not be empty".to_string()));
    }

    match kind {
        HandlerKind::Discord | HandlerKind::Webhook => {
            if !(request.url.starts_with("http://") || request.url.starts_with("https://")) {
                return Err(RegistryError::InvalidRequest(format!(
                    "url '{}' must be http(s)",
                    request.url
                )));
            }
        }
        HandlerKind::Smtp => {
            let settings = request.smtp.as_ref().ok_or_else(|| {
                RegistryError::InvalidRequest("smtp handler needs smtp settings".to_string())
            })?;
            smtp::validate_settings(settings).map_err(RegistryError::InvalidRequest)?;
        }
    }

    Ok(HandlerInfo {
        kind,
        name: request.name.clone(),
        url: request.url.clone(),
        user_id: request.user_id.clone(),
        smtp: request.smtp.clone(),
    })
}
