//! Minimal TwiML document builder.

use axum::http::header;
use axum::response::{IntoResponse, Response};

/// A `<Response>` document, built verb by verb.
#[derive(Debug, Clone, Default)]
pub struct Twiml {
    verbs: Vec<String>,
}

impl Twiml {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.verbs.push(format!("<Say>{}</Say>", escape(text)));
        self
    }

    pub fn play(mut self, url: &str) -> Self {
        self.verbs.push(format!("<Play>{}</Play>", escape(url)));
        self
    }

    /// Records the caller and posts the recording to `action`.
    pub fn record(mut self, action: &str, max_length: u32) -> Self {
        self.verbs.push(format!(
            r#"<Record action="{}" method="POST" maxLength="{}" playBeep="true"/>"#,
            escape(action),
            max_length
        ));
        self
    }

    /// Bridges the call audio to a Media Streams WebSocket.
    pub fn connect_stream(mut self, url: &str) -> Self {
        self.verbs.push(format!(
            r#"<Connect><Stream url="{}"/></Connect>"#,
            escape(url)
        ));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push("<Hangup/>".to_string());
        self
    }

    pub fn render(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response>{}</Response>"#,
            self.verbs.concat()
        )
    }
}

impl IntoResponse for Twiml {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.render()).into_response()
    }
}

/// Escapes text for use in XML content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
