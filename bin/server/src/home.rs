//! The Home controller.

use axum::Extension;
use axum::response::Html;
use axum::routing::get;
use oidc_gate_access::Access;
use std::fmt::Write;

use crate::auth::{OptionalAuth, RequireAuth};
use crate::pipeline::{Pipeline, ResolvedEndpoint};
use crate::views::{escape_html, layout};

/// Controller name used in routes.
pub const CONTROLLER: &str = "Home";

/// Maps the Home actions onto the pipeline.
pub fn map(pipeline: Pipeline) -> Pipeline {
    pipeline
        .map_action(CONTROLLER, "Index", Access::Anonymous, get(index))
        .map_action(CONTROLLER, "Privacy", Access::Anonymous, get(privacy))
        .map_action(CONTROLLER, "Claims", Access::Authenticated, get(claims))
        .map_action(CONTROLLER, "Error", Access::Anonymous, get(error))
}

async fn index(OptionalAuth(principal): OptionalAuth) -> Html<String> {
    let name = principal.as_ref().and_then(|p| p.display_name().or(p.subject()));
    let body = match name {
        Some(name) => format!("<h1>Welcome, {}</h1>", escape_html(name)),
        None => "<h1>Welcome</h1><p>Sign in to see your claims.</p>".to_string(),
    };
    layout("Home", name, &body)
}

async fn privacy(OptionalAuth(principal): OptionalAuth) -> Html<String> {
    let name = principal.as_ref().and_then(|p| p.display_name().or(p.subject()));
    layout(
        "Privacy Policy",
        name,
        "<h1>Privacy Policy</h1><p>Your session is kept in an encrypted cookie and nowhere else.</p>",
    )
}

async fn claims(
    RequireAuth(principal): RequireAuth,
    Extension(endpoint): Extension<ResolvedEndpoint>,
) -> Html<String> {
    let mut body = String::from("<h1>Claims</h1>");
    if let Some(id) = &endpoint.values.id {
        let _ = write!(body, "<p>Requested id: {}</p>", escape_html(id));
    }

    body.push_str("<table><thead><tr><th>Type</th><th>Value</th></tr></thead><tbody>");
    for claim in principal.claims() {
        let _ = write!(
            body,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(&claim.claim_type),
            escape_html(&claim.value)
        );
    }
    body.push_str("</tbody></table>");

    let _ = write!(
        body,
        "<p>Session {} expires at {}.</p>",
        principal.id(),
        principal.expires_at().to_rfc3339()
    );
    if let Some(tokens) = principal.tokens() {
        let _ = write!(
            body,
            "<p>Saved tokens: access token, refresh token {}, ID token {}.</p>",
            if tokens.refresh_token().is_some() { "present" } else { "absent" },
            if tokens.id_token().is_some() { "present" } else { "absent" },
        );
    }

    let name = principal.display_name().or(principal.subject());
    layout("Claims", name, &body)
}

async fn error(OptionalAuth(principal): OptionalAuth) -> Html<String> {
    let name = principal.as_ref().and_then(|p| p.display_name().or(p.subject()));
    layout(
        "Error",
        name,
        "<h1>Error</h1><p>An error occurred while processing your request.</p>",
    )
}
