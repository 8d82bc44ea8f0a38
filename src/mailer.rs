//! Outbound verification email.
//!
//! `SendGridMailer` talks to the SendGrid v3 HTTP API. Without credentials the
//! app falls back to `LogMailer`, which only writes the link to the log.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::config::MailConfig;

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone)]
pub struct VerificationEmail {
    pub to: String,
    pub name: String,
    pub verify_url: String,
}

impl VerificationEmail {
    pub fn subject(&self) -> &'static str {
        "Confirm your email address"
    }

    pub fn html(&self) -> String {
        format!(
            "<p>Hello {name},</p>\
             <p>Please confirm your email address by opening the link below.</p>\
             <p><a href=\"{url}\">{url}</a></p>\
             <p>The link expires in 1 hour.</p>",
            name = escape_html(&self.name),
            url = self.verify_url,
        )
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, mail: &VerificationEmail) -> anyhow::Result<()>;
}

pub struct SendGridMailer {
    http: reqwest::Client,
    api_key: String,
    from: String,
}

impl SendGridMailer {
    pub fn new(api_key: String, from: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("build sendgrid http client")?;
        Ok(Self {
            http,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send_verification(&self, mail: &VerificationEmail) -> anyhow::Result<()> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": mail.to }] }],
            "from": { "email": self.from },
            "subject": mail.subject(),
            "content": [{ "type": "text/html", "value": mail.html() }],
        });

        self.http
            .post(SENDGRID_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("sendgrid request")?
            .error_for_status()
            .context("sendgrid rejected message")?;

        info!(to = %mail.to, "verification email sent");
        Ok(())
    }
}

/// Development delivery: logs instead of sending.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, mail: &VerificationEmail) -> anyhow::Result<()> {
        debug!(to = %mail.to, verify_url = %mail.verify_url, "verification email (log only)");
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match (&cfg.sendgrid_api_key, &cfg.from) {
        (Some(key), Some(from)) => Ok(Arc::new(SendGridMailer::new(
            key.clone(),
            from.clone(),
            cfg.timeout,
        )?)),
        _ => {
            info!("SENDGRID_API_KEY or MAIL_FROM missing; verification links are logged only");
            Ok(Arc::new(LogMailer))
        }
    }
}
