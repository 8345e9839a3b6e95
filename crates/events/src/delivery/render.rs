//! Notification email rendering.

use herald_core::notification::Notification;

const DEFAULT_PORTAL_NAME: &str = "Training Portal";
const DEFAULT_BASE_URL: &str = "http://localhost:5173";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Shown in the subject prefix and footer.
    pub portal_name: String,
    /// Prefixed to relative action links.
    pub base_url: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            portal_name: DEFAULT_PORTAL_NAME.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl RenderConfig {
    /// | Variable          | Default                 |
    /// |-------------------|-------------------------|
    /// | `PORTAL_NAME`     | `Training Portal`       |
    /// | `PORTAL_BASE_URL` | `http://localhost:5173` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            portal_name: std::env::var("PORTAL_NAME").unwrap_or(defaults.portal_name),
            base_url: std::env::var("PORTAL_BASE_URL").unwrap_or(defaults.base_url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub struct EmailRenderer {
    config: RenderConfig,
}

impl EmailRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn render(&self, notification: &Notification, display_name: &str) -> RenderedEmail {
        let portal = &self.config.portal_name;
        let subject = format!("[{portal}] {}", notification.title);
        let link = notification.payload.action_url().map(|url| self.absolute(url));

        let mut text = format!(
            "Hi {display_name},\n\n{}\n\n{}\n",
            notification.title, notification.message
        );
        if let Some(link) = &link {
            text.push_str(&format!("\nOpen: {link}\n"));
        }
        text.push_str(&format!("\n-- \n{portal}\n"));

        let button = link
            .as_deref()
            .map(|link| {
                format!(
                    "<p><a href=\"{}\" style=\"display:inline-block;padding:10px 16px;\
                     background:#2563eb;color:#ffffff;text-decoration:none;border-radius:4px\">\
                     View in {}</a></p>",
                    escape_html(link),
                    escape_html(portal)
                )
            })
            .unwrap_or_default();

        let html = format!(
            "<!DOCTYPE html><html><body style=\"font-family:sans-serif;color:#111827\">\
             <p>Hi {name},</p>\
             <h2 style=\"margin:16px 0 8px\">{title}</h2>\
             <p style=\"white-space:pre-line\">{message}</p>\
             {button}\
             <hr style=\"border:none;border-top:1px solid #e5e7eb\">\
             <p style=\"font-size:12px;color:#6b7280\">{portal}</p>\
             </body></html>",
            name = escape_html(display_name),
            title = escape_html(&notification.title),
            message = escape_html(&notification.message),
            portal = escape_html(portal),
        );

        RenderedEmail {
            subject,
            html,
            text,
        }
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }
}

impl Default for EmailRenderer {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
