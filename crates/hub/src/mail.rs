//! Alert e-mail through an SMTP relay (typically a local MTA). Sends are
//! spawned and never awaited by the caller; a failed delivery is logged and
//! dropped.

use anyhow::{Context, Result};
use std::fmt;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error, info};

use crate::config::MailConfig;

pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str);
}

struct Route {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

pub struct Mailer {
    route: Option<Route>,
}

// The SMTP transport has no Debug, so only the addresses are shown.
impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mailer");
        d.field("enabled", &self.enabled());
        if let Some(route) = &self.route {
            d.field("from", &route.from.to_string())
                .field("to", &route.to.to_string());
        }
        d.finish()
    }
}

impl Mailer {
    /// Build from config. An empty recipient yields a mailer that only logs.
    pub fn new(cfg: &MailConfig) -> Result<Self> {
        if !cfg.enabled() {
            info!("mail recipient not configured, alerts will only be logged");
            return Ok(Self { route: None });
        }

        let from: Mailbox = cfg
            .sender
            .parse()
            .with_context(|| format!("invalid mail sender '{}'", cfg.sender))?;
        let to: Mailbox = cfg
            .recipient
            .parse()
            .with_context(|| format!("invalid mail recipient '{}'", cfg.recipient))?;

        let (host, port) = match cfg.smtp_server.rsplit_once(':') {
            Some((h, p)) => (
                h,
                Some(
                    p.parse::<u16>()
                        .with_context(|| format!("invalid smtp port in '{}'", cfg.smtp_server))?,
                ),
            ),
            None => (cfg.smtp_server.as_str(), None),
        };
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host);
        if let Some(port) = port {
            builder = builder.port(port);
        }

        info!(server = %cfg.smtp_server, to = %to, "mail alerts enabled");
        Ok(Self {
            route: Some(Route {
                transport: builder.build(),
                from,
                to,
            }),
        })
    }

    pub fn enabled(&self) -> bool {
        self.route.is_some()
    }
}

impl Notifier for Mailer {
    fn notify(&self, subject: &str, body: &str) {
        let Some(route) = &self.route else {
            debug!(%subject, "mail disabled, alert not sent");
            return;
        };

        let message = match Message::builder()
            .from(route.from.clone())
            .to(route.to.clone())
            .subject(subject)
            .body(body.to_string())
        {
            Ok(m) => m,
            Err(e) => {
                error!(%subject, error = %e, "failed to build alert e-mail");
                return;
            }
        };

        let transport = route.transport.clone();
        let subject = subject.to_string();
        tokio::spawn(async move {
            match transport.send(message).await {
                Ok(_) => info!(%subject, "alert e-mail sent"),
                Err(e) => error!(%subject, error = %e, "alert e-mail failed"),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Test notifier
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::Notifier;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub(crate) fn subjects(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, subject: &str, body: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
