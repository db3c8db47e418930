//! Minimal server-rendered HTML.

use axum::response::Html;
use std::fmt::Write;

/// Escapes text for use in HTML element content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Wraps page content in the shared layout.
///
/// `title` is escaped; `body` must already be safe HTML.
pub fn layout(title: &str, signed_in_as: Option<&str>, body: &str) -> Html<String> {
    let mut nav = String::from(r#"<a href="/">Home</a> | <a href="/Home/Privacy">Privacy</a>"#);
    match signed_in_as {
        Some(name) => {
            let _ = write!(
                nav,
                r#" | <a href="/Home/Claims">Claims</a> | <span>{}</span> | <a href="/signout">Sign out</a>"#,
                escape_html(name)
            );
        }
        None => nav.push_str(r#" | <a href="/signin">Sign in</a>"#),
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<nav>{nav}</nav>
<main>
{body}
</main>
</body>
</html>"#,
        title = escape_html(title),
    ))
}
