use std::collections::HashMap;

use crate::db::DbPool;
use crate::models::settings::Setting;

/// A named notification mail. Both parts may be overridden through the
/// `mail_tpl_<name>_subject` / `mail_tpl_<name>_body` options.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub name: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
}

pub const COMMENT_ADMIN: Template = Template {
    name: "comment_admin",
    subject: "[{{site_name}}] New comment on \"{{title}}\"",
    body: "<p>{{author}} ({{mail}}) commented on <a href=\"{{permalink}}\">{{title}}</a>:</p>\
           <blockquote>{{text}}</blockquote>\
           <p>Status: <strong>{{status}}</strong></p>\
           <p><a href=\"{{site_url}}\">{{site_name}}</a></p>",
};

pub const COMMENT_REPLY: Template = Template {
    name: "comment_reply",
    subject: "[{{site_name}}] {{author}} replied to your comment",
    body: "<p>Hi {{parent_author}},</p>\
           <p>Your comment on <a href=\"{{permalink}}\">{{title}}</a>:</p>\
           <blockquote>{{parent_text}}</blockquote>\
           <p>{{author}} replied:</p>\
           <blockquote>{{text}}</blockquote>\
           <p><a href=\"{{permalink}}\">View the conversation</a></p>",
};

pub const LINK_APPLY: Template = Template {
    name: "link_apply",
    subject: "[{{site_name}}] New friend link application: {{name}}",
    body: "<p>A new friend link application is waiting for review.</p>\
           <ul><li>Name: {{name}}</li><li>URL: <a href=\"{{url}}\">{{url}}</a></li>\
           <li>Description: {{description}}</li><li>E-mail: {{email}}</li></ul>\
           <blockquote>{{message}}</blockquote>",
};

pub const LINK_APPROVED: Template = Template {
    name: "link_approved",
    subject: "[{{site_name}}] Your friend link was approved",
    body: "<p>Hi {{name}},</p>\
           <p>Your site <a href=\"{{url}}\">{{url}}</a> is now listed on \
           <a href=\"{{site_url}}\">{{site_name}}</a>. Thanks for linking!</p>",
};

pub const LINK_REJECTED: Template = Template {
    name: "link_rejected",
    subject: "[{{site_name}}] About your friend link application",
    body: "<p>Hi {{name}},</p>\
           <p>Sorry, your friend link application for <a href=\"{{url}}\">{{url}}</a> \
           was not accepted on <a href=\"{{site_url}}\">{{site_name}}</a>.</p>",
};

pub const WELCOME: Template = Template {
    name: "welcome",
    subject: "Welcome to {{site_name}}",
    body: "<p>Hi {{name}},</p>\
           <p>Your account on <a href=\"{{site_url}}\">{{site_name}}</a> is ready.</p>",
};

pub const REGISTER_ADMIN: Template = Template {
    name: "register_admin",
    subject: "[{{site_name}}] New user registered: {{name}}",
    body: "<p>{{name}} ({{mail}}) just registered in group <strong>{{group}}</strong>.</p>",
};

pub const NEW_POST: Template = Template {
    name: "new_post",
    subject: "[{{site_name}}] {{title}}",
    body: "<h2><a href=\"{{permalink}}\">{{title}}</a></h2>\
           <p>{{excerpt}}</p>\
           <p><a href=\"{{permalink}}\">Read more</a></p>\
           <p style=\"color:#888;font-size:12px\">You receive this mail because you subscribed to \
           {{site_name}}.</p>",
};

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Substitute `{{key}}` placeholders. Unknown keys render empty. Values are
/// HTML-escaped when `escape` is set.
pub fn render(template: &str, vars: &HashMap<&str, String>, escape: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = vars.get(key) {
                    if escape {
                        out.push_str(&escape_html(value));
                    } else {
                        out.push_str(value);
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render subject and body, honoring option overrides. Site name and URL are
/// always available as `site_name` / `site_url`.
pub fn compose(pool: &DbPool, tpl: &Template, vars: &HashMap<&str, String>) -> (String, String) {
    let mut vars = vars.clone();
    vars.entry("site_name")
        .or_insert_with(|| Setting::get_or(pool, "site_name", "My Blog"));
    vars.entry("site_url")
        .or_insert_with(|| Setting::get_or(pool, "site_url", ""));

    let subject_tpl = Setting::get(pool, &format!("mail_tpl_{}_subject", tpl.name))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| tpl.subject.to_string());
    let body_tpl = Setting::get(pool, &format!("mail_tpl_{}_body", tpl.name))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| tpl.body.to_string());

    let subject = render(&subject_tpl, &vars, false)
        .replace(['\r', '\n'], " ");
    let body = render(&body_tpl, &vars, true);
    (subject, body)
}
