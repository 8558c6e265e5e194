//! Notification flows triggered by host events. Each flow checks its
//! `notify_*` switch, renders a template and hands the mail to SMTP.
//! Delivery problems are logged and counted, never returned.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::email::templates::{self, Template};
use crate::email::{send_mail, OutgoingMail};
use crate::models::settings::Setting;
use crate::store::links::{FriendLink, LinkStatus};
use crate::store::LocalStorage;

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifyReport {
    pub sent: usize,
    pub failed: usize,
}

impl NotifyReport {
    fn merge(&mut self, other: NotifyReport) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParentComment {
    pub author: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentEvent {
    pub cid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub permalink: String,
    pub author: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub url: String,
    pub text: String,
    #[serde(default = "default_comment_status")]
    pub status: String,
    #[serde(default)]
    pub parent: Option<ParentComment>,
}

fn default_comment_status() -> String {
    "approved".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationEvent {
    pub name: String,
    pub mail: String,
    #[serde(default = "default_group")]
    pub group: String,
}

fn default_group() -> String {
    "subscriber".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostEvent {
    pub cid: i64,
    pub title: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub excerpt: String,
}

fn dispatch(pool: &DbPool, tpl: &Template, to: &str, vars: &HashMap<&str, String>) -> NotifyReport {
    let to = to.trim();
    if to.is_empty() {
        return NotifyReport::default();
    }
    let (subject, html) = templates::compose(pool, tpl, vars);
    let mail = OutgoingMail {
        to: to.to_string(),
        subject,
        html,
    };
    match send_mail(pool, &mail) {
        Ok(()) => NotifyReport { sent: 1, failed: 0 },
        Err(_) => NotifyReport { sent: 0, failed: 1 },
    }
}

fn admin_email(pool: &DbPool) -> String {
    Setting::get_or(pool, "admin_email", "")
}

/// Strip tags and cut to a short plain-text excerpt.
pub fn excerpt(html: &str, max: usize) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut cut: String = collapsed.chars().take(max).collect();
    if collapsed.chars().count() > max {
        cut.push('…');
    }
    cut
}

/// Admin notice for a new comment, plus a reply notice to the parent's
/// author when the comment is visible and comes from someone else.
pub fn notify_comment(pool: &DbPool, event: &CommentEvent) -> NotifyReport {
    let mut report = NotifyReport::default();
    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("title", event.title.clone());
    vars.insert("permalink", event.permalink.clone());
    vars.insert("author", event.author.clone());
    vars.insert("mail", event.mail.clone());
    vars.insert("url", event.url.clone());
    vars.insert("text", event.text.clone());
    vars.insert("status", event.status.clone());

    let admin = admin_email(pool);
    if Setting::get_bool(pool, "notify_comment_admin")
        && !admin.is_empty()
        && !admin.eq_ignore_ascii_case(event.mail.trim())
    {
        report.merge(dispatch(pool, &templates::COMMENT_ADMIN, &admin, &vars));
    }

    if let Some(parent) = &event.parent {
        let own_reply = parent.mail.trim().eq_ignore_ascii_case(event.mail.trim());
        if Setting::get_bool(pool, "notify_comment_reply")
            && event.status == "approved"
            && !parent.mail.trim().is_empty()
            && !own_reply
        {
            vars.insert("parent_author", parent.author.clone());
            vars.insert("parent_text", parent.text.clone());
            report.merge(dispatch(pool, &templates::COMMENT_REPLY, &parent.mail, &vars));
        }
    }
    report
}

fn link_vars(link: &FriendLink) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("name", link.name.clone());
    vars.insert("url", link.url.clone());
    vars.insert("description", link.description.clone());
    vars.insert("email", link.email.clone());
    vars.insert("message", link.message.clone());
    vars
}

pub fn notify_link_application(pool: &DbPool, link: &FriendLink) -> NotifyReport {
    if !Setting::get_bool(pool, "notify_link_apply") {
        return NotifyReport::default();
    }
    dispatch(pool, &templates::LINK_APPLY, &admin_email(pool), &link_vars(link))
}

/// Tell the applicant about an approval or rejection. Pending links and
/// applicants without an address are skipped.
pub fn notify_link_result(pool: &DbPool, link: &FriendLink) -> NotifyReport {
    if !Setting::get_bool(pool, "notify_link_result") {
        return NotifyReport::default();
    }
    let tpl = match LinkStatus::parse(&link.status) {
        Some(LinkStatus::Approved) => &templates::LINK_APPROVED,
        Some(LinkStatus::Rejected) => &templates::LINK_REJECTED,
        _ => return NotifyReport::default(),
    };
    dispatch(pool, tpl, &link.email, &link_vars(link))
}

pub fn notify_registration(pool: &DbPool, event: &RegistrationEvent) -> NotifyReport {
    let mut report = NotifyReport::default();
    if !Setting::get_bool(pool, "notify_register") {
        return report;
    }
    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("name", event.name.clone());
    vars.insert("mail", event.mail.clone());
    vars.insert("group", event.group.clone());

    report.merge(dispatch(pool, &templates::WELCOME, &event.mail, &vars));
    report.merge(dispatch(pool, &templates::REGISTER_ADMIN, &admin_email(pool), &vars));
    report
}

/// Mail a freshly published post to every active subscriber.
pub fn notify_new_post(pool: &DbPool, store: &LocalStorage, event: &PostEvent) -> NotifyReport {
    let mut report = NotifyReport::default();
    if !Setting::get_bool(pool, "notify_publish") {
        return report;
    }
    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("title", event.title.clone());
    vars.insert("permalink", event.permalink.clone());
    vars.insert("excerpt", excerpt(&event.excerpt, EXCERPT_CHARS));

    let subscribers = store.list_subscribers(Some("active"));
    log::info!(
        "[notify] post {} \"{}\" → {} subscriber(s)",
        event.cid,
        event.title,
        subscribers.len()
    );
    for sub in subscribers {
        report.merge(dispatch(pool, &templates::NEW_POST, &sub.email, &vars));
    }
    report
}
