//! Email notifications over SMTP

use std::time::Duration;

use anyhow::{Context, Result};
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, instrument};

use super::{HandlerInfo, SmtpSettings};
use crate::actors::messages::CollectorAlert;

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Check addresses and credentials before a handler is registered
pub fn validate_settings(settings: &SmtpSettings) -> Result<(), String> {
    if settings.host.trim().is_empty() {
        return Err("smtp host must not be empty".to_string());
    }
    settings
        .from
        .parse::<Mailbox>()
        .map_err(|e| format!("invalid sender address '{}': {e}", settings.from))?;
    if settings.to.is_empty() {
        return Err("smtp handler needs at least one recipient".to_string());
    }
    for to in &settings.to {
        to.parse::<Mailbox>()
            .map_err(|e| format!("invalid recipient address '{to}': {e}"))?;
    }
    if settings.username.is_some() != settings.password.is_some() {
        return Err("smtp username and password must be given together".to_string());
    }
    Ok(())
}

pub fn build_message(settings: &SmtpSettings, alert: &CollectorAlert) -> Result<Message> {
    let from: Mailbox = settings.from.parse().context("invalid sender address")?;
    let mut builder = Message::builder()
        .from(from)
        .subject(format!("[collector] {}", alert.kind.title()))
        .header(ContentType::TEXT_PLAIN);
    for to in &settings.to {
        let to: Mailbox = to
            .parse()
            .with_context(|| format!("invalid recipient address '{to}'"))?;
        builder = builder.to(to);
    }

    let body = format!(
        "{}\n\n{}\n\nat {}\n",
        alert.kind.title(),
        alert.kind,
        alert.timestamp.to_rfc3339()
    );
    builder.body(body).context("failed to build alert email")
}

fn transport(settings: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let mut builder = if settings.starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .with_context(|| format!("failed to set up STARTTLS for {}", settings.host))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
    };
    builder = builder.port(settings.port).timeout(Some(SMTP_TIMEOUT));

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }
    Ok(builder.build())
}

#[instrument(skip_all, fields(handler = %handler.name))]
pub async fn send_alert(handler: &HandlerInfo, alert: &CollectorAlert) -> Result<()> {
    let settings = handler
        .smtp
        .as_ref()
        .context("smtp handler has no smtp settings")?;

    let message = build_message(settings, alert)?;
    transport(settings)?
        .send(message)
        .await
        .with_context(|| format!("failed to send alert email via {}:{}", settings.host, settings.port))?;

    debug!("sent alert email to {} recipients", settings.to.len());
    Ok(())
}
