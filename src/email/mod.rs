pub mod templates;

use std::collections::HashMap;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::models::settings::{is_truthy, Setting};

pub const STATUS_KEY: &str = "mail_last_status";

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail sending is disabled")]
    Disabled,
    #[error("SMTP is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("invalid address {0:?}")]
    Address(String),
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("SMTP error: {0}")]
    Smtp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    StartTls,
    Tls,
    Plain,
}

impl Security {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" | "ssl" | "smtps" => Self::Tls,
            "none" | "plain" | "" => Self::Plain,
            _ => Self::StartTls,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub security: Security,
    pub from: String,
    pub from_name: String,
}

impl MailSettings {
    pub fn load(pool: &DbPool) -> Self {
        Self::from_map(&Setting::get_group(pool, "mail_"))
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| map.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let security = Security::parse(&get("mail_smtp_secure"));
        let default_port = match security {
            Security::Tls => 465,
            Security::StartTls => 587,
            Security::Plain => 25,
        };
        let user = get("mail_smtp_user");
        let from = get("mail_from");
        MailSettings {
            enabled: is_truthy(&get("mail_enabled")),
            host: get("mail_smtp_host"),
            port: get("mail_smtp_port").parse().unwrap_or(default_port),
            pass: map.get("mail_smtp_pass").cloned().unwrap_or_default(),
            security,
            from: if from.is_empty() { user.clone() } else { from },
            user,
            from_name: get("mail_from_name"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Last delivery attempt, persisted for the admin status panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailStatus {
    pub ok: bool,
    pub message: String,
    pub to: String,
    pub subject: String,
    pub at: String,
}

/// Send one message and record the outcome. Callers decide whether to care
/// about the result; notification flows ignore it.
pub fn send_mail(pool: &DbPool, mail: &OutgoingMail) -> Result<(), MailError> {
    let settings = MailSettings::load(pool);
    let result = deliver(&settings, mail);
    let status = MailStatus {
        ok: result.is_ok(),
        message: match &result {
            Ok(()) => "sent".to_string(),
            Err(e) => e.to_string(),
        },
        to: mail.to.clone(),
        subject: mail.subject.clone(),
        at: chrono::Utc::now().to_rfc3339(),
    };
    match &result {
        Ok(()) => log::info!("[mail] sent \"{}\" to {}", mail.subject, mail.to),
        Err(e) => log::warn!("[mail] failed to send \"{}\" to {}: {}", mail.subject, mail.to, e),
    }
    if let Err(e) = Setting::set_json(pool, STATUS_KEY, &status) {
        log::warn!("[mail] cannot record status: {}", e);
    }
    result
}

pub fn last_status(pool: &DbPool) -> Option<MailStatus> {
    Setting::get(pool, STATUS_KEY)
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

pub fn build_message(settings: &MailSettings, mail: &OutgoingMail) -> Result<Message, MailError> {
    let from_addr: Address = settings
        .from
        .parse()
        .map_err(|_| MailError::Address(settings.from.clone()))?;
    let from_name = if settings.from_name.is_empty() {
        None
    } else {
        Some(settings.from_name.clone())
    };
    let to: Mailbox = mail
        .to
        .trim()
        .parse()
        .map_err(|_| MailError::Address(mail.to.clone()))?;

    Message::builder()
        .from(Mailbox::new(from_name, from_addr))
        .to(to)
        .subject(mail.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(mail.html.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

fn deliver(settings: &MailSettings, mail: &OutgoingMail) -> Result<(), MailError> {
    if !settings.enabled {
        return Err(MailError::Disabled);
    }
    if settings.host.is_empty() {
        return Err(MailError::NotConfigured("mail_smtp_host"));
    }
    if settings.from.is_empty() {
        return Err(MailError::NotConfigured("mail_from"));
    }
    let email = build_message(settings, mail)?;

    let builder = match settings.security {
        Security::StartTls => SmtpTransport::starttls_relay(&settings.host)
            .map_err(|e| MailError::Smtp(format!("SMTP relay error: {}", e)))?,
        Security::Tls => SmtpTransport::relay(&settings.host)
            .map_err(|e| MailError::Smtp(format!("SMTP relay error: {}", e)))?,
        Security::Plain => SmtpTransport::builder_dangerous(&settings.host),
    };
    let mut builder = builder
        .port(settings.port)
        .timeout(Some(Duration::from_secs(20)));
    if !settings.user.is_empty() {
        builder = builder.credentials(Credentials::new(
            settings.user.clone(),
            settings.pass.clone(),
        ));
    }

    builder
        .build()
        .send(&email)
        .map_err(|e| MailError::Smtp(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn settings_pick_port_from_security() {
        let s = MailSettings::from_map(&map(&[("mail_smtp_secure", "ssl")]));
        assert_eq!(s.security, Security::Tls);
        assert_eq!(s.port, 465);
        let s = MailSettings::from_map(&map(&[("mail_smtp_secure", "starttls"), ("mail_smtp_port", "2525")]));
        assert_eq!(s.port, 2525);
        let s = MailSettings::from_map(&map(&[("mail_smtp_user", "bot@example.com")]));
        assert_eq!(s.from, "bot@example.com");
        assert!(!s.enabled);
    }

    #[test]
    fn disabled_mail_never_connects() {
        let s = MailSettings::from_map(&map(&[("mail_enabled", "false"), ("mail_smtp_host", "smtp.invalid")]));
        let mail = OutgoingMail {
            to: "reader@example.com".into(),
            subject: "hi".into(),
            html: "<p>hi</p>".into(),
        };
        assert!(matches!(deliver(&s, &mail), Err(MailError::Disabled)));
    }

    #[test]
    fn build_message_validates_addresses() {
        let s = MailSettings::from_map(&map(&[
            ("mail_from", "blog@example.com"),
            ("mail_from_name", "My Blog"),
        ]));
        let ok = OutgoingMail {
            to: "reader@example.com".into(),
            subject: "New comment".into(),
            html: "<p>hi</p>".into(),
        };
        assert!(build_message(&s, &ok).is_ok());

        let bad = OutgoingMail {
            to: "not-an-address".into(),
            ..ok
        };
        assert!(matches!(build_message(&s, &bad), Err(MailError::Address(_))));
    }
}
