//! TwiML call instructions: greet the caller, then stream audio to `/media`.

/// Media-stream URL to hand to Twilio. A configured public URL wins;
/// otherwise it is derived from the request's `Host` header.
pub fn stream_url(public_url: Option<&str>, host: Option<&str>) -> String {
    if let Some(url) = public_url.filter(|u| !u.is_empty()) {
        return url.to_string();
    }
    format!("wss://{}/media", host.unwrap_or("localhost"))
}

pub fn render(greeting: &str, stream_url: &str) -> String {
    let say = if greeting.is_empty() {
        String::new()
    } else {
        format!("<Say>{}</Say>", escape_xml(greeting))
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response>{say}<Connect><Stream url="{}"/></Connect></Response>"#,
        escape_xml(stream_url)
    )
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
