//! Push notifications for backup and restore events
//!
//! Posts to an ntfy-compatible topic URL. Delivery is best effort: a push
//! failure is logged and swallowed, it never fails the run that triggered it.

use crate::config::{NotificationConfig, Severity};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct NotificationManager {
    config: Option<NotificationConfig>,
}

impl Severity {
    /// ntfy priority header value
    fn ntfy_priority(&self) -> &'static str {
        match self {
            Severity::Failure => "urgent",
            Severity::Warning => "high",
            Severity::Success | Severity::Info => "default",
        }
    }

    /// ntfy tags header value (emoji shortcodes)
    fn ntfy_tags(&self) -> &'static str {
        match self {
            Severity::Failure => "rotating_light",
            Severity::Warning => "warning",
            Severity::Success => "white_check_mark",
            Severity::Info => "information_source",
        }
    }
}

impl NotificationManager {
    pub fn new(config: Option<NotificationConfig>) -> Self {
        Self { config }
    }

    /// Whether this severity is configured to be pushed
    pub fn is_enabled(&self, severity: Severity) -> bool {
        self.config
            .as_ref()
            .map(|c| !c.url.is_empty() && c.notify_on.contains(&severity))
            .unwrap_or(false)
    }

    pub fn send_success(&self, title: &str, message: &str) {
        self.send(Severity::Success, title, message);
    }

    pub fn send_warning(&self, title: &str, message: &str) {
        self.send(Severity::Warning, title, message);
    }

    pub fn send_failure(&self, title: &str, message: &str) {
        self.send(Severity::Failure, title, message);
    }

    /// Push one notification; logs and swallows any delivery error
    pub fn send(&self, severity: Severity, title: &str, message: &str) {
        if !self.is_enabled(severity) {
            debug!(%severity, "notification severity not configured; skipping");
            return;
        }
        if let Err(e) = self.post(severity, title, message) {
            warn!(%severity, error = %e, "notification delivery failed");
        }
    }

    fn post(&self, severity: Severity, title: &str, message: &str) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .context("notifications not configured")?;

        let client = reqwest::blocking::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let mut request = client
            .post(&config.url)
            .header("Title", title)
            .header("Priority", severity.ntfy_priority())
            .header("Tags", severity.ntfy_tags())
            .body(message.to_string());

        if let Some(token) = &config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().context("push request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("push endpoint returned {}", response.status());
        }
        debug!(%severity, title, "notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(notify_on: Vec<Severity>) -> NotificationConfig {
        NotificationConfig {
            url: "http://localhost:1/push".to_string(),
            token: None,
            notify_on,
        }
    }

    #[test]
    fn unconfigured_manager_pushes_nothing() {
        let manager = NotificationManager::new(None);
        assert!(!manager.is_enabled(Severity::Failure));
        // must not error or panic
        manager.send_failure("backup failed", "details");
    }

    #[test]
    fn severity_filter_honors_notify_on() {
        let manager = NotificationManager::new(Some(config(vec![
            Severity::Failure,
            Severity::Warning,
        ])));
        assert!(manager.is_enabled(Severity::Failure));
        assert!(manager.is_enabled(Severity::Warning));
        assert!(!manager.is_enabled(Severity::Success));
    }

    #[test]
    fn delivery_failure_is_swallowed() {
        // unroutable endpoint; send must still return
        let manager = NotificationManager::new(Some(config(vec![Severity::Failure])));
        manager.send_failure("backup failed", "details");
    }

    #[test]
    fn severity_maps_to_push_priority() {
        assert_eq!(Severity::Failure.ntfy_priority(), "urgent");
        assert_eq!(Severity::Success.ntfy_priority(), "default");
        assert_eq!(Severity::Warning.ntfy_tags(), "warning");
    }
}
