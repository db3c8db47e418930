//! HTTP rendering of authentication failures.
//!
//! Sign-in failures never leave a partial session behind: the handlers only
//! touch cookies after every check has passed, so these responses carry no
//! `Set-Cookie` header.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use oidc_gate_access::AuthenticationError;
use std::any::Any;

use crate::config::Environment;
use crate::views::{escape_html, layout};

/// A failed sign-in attempt, rendered as an error page.
#[derive(Debug)]
pub struct AuthFailure {
    error: AuthenticationError,
    environment: Environment,
}

impl AuthFailure {
    /// Wraps an error for rendering in the given environment.
    pub fn new(error: AuthenticationError, environment: Environment) -> Self {
        Self { error, environment }
    }

    /// Returns the underlying error.
    pub fn error(&self) -> &AuthenticationError {
        &self.error
    }

    /// Returns the status code for this failure.
    pub fn status(&self) -> StatusCode {
        status_for(&self.error)
    }
}

/// Maps an authentication error to its response status.
pub fn status_for(error: &AuthenticationError) -> StatusCode {
    match error {
        AuthenticationError::InvalidState { .. } => StatusCode::BAD_REQUEST,
        AuthenticationError::TokenValidation { .. } => StatusCode::UNAUTHORIZED,
        AuthenticationError::Network { .. } | AuthenticationError::ProviderError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        AuthenticationError::SessionTooLarge { .. } | AuthenticationError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.error.kind(), error = %self.error, "sign-in failed");
        } else {
            tracing::warn!(kind = self.error.kind(), error = %self.error, "sign-in rejected");
        }

        let mut body = String::from("<h1>Sign-in failed</h1>");
        if self.error.is_transient() {
            body.push_str(
                r#"<p>The identity provider could not be reached. <a href="/signin">Try again</a>.</p>"#,
            );
        } else {
            body.push_str(
                r#"<p>We could not sign you in. <a href="/signin">Start over</a>.</p>"#,
            );
        }
        if self.environment.is_development() {
            body.push_str(&format!(
                "<pre>{}: {}</pre>",
                self.error.kind(),
                escape_html(&self.error.to_string())
            ));
        }

        (status, layout("Sign-in failed", None, &body)).into_response()
    }
}

/// A signed-in caller lacking what the endpoint requires.
pub fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        layout(
            "Access denied",
            None,
            "<h1>Access denied</h1><p>You do not have access to this page.</p>",
        ),
    )
        .into_response()
}

/// The generic error page, as served at `/Home/Error`.
pub fn error_page(status: StatusCode) -> Response {
    (
        status,
        layout(
            "Error",
            None,
            "<h1>Error</h1><p>An error occurred while processing your request.</p>",
        ),
    )
        .into_response()
}

/// The request pipeline did not run as configured.
pub fn pipeline_fault(detail: &str) -> Response {
    tracing::error!(detail, "request pipeline fault");
    error_page(StatusCode::INTERNAL_SERVER_ERROR)
}

/// A request the server refuses to handle as sent.
pub fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        layout(
            "Bad request",
            None,
            &format!("<h1>Bad request</h1><p>{}</p>", escape_html(message)),
        ),
    )
        .into_response()
}

/// Renders a handler panic as a 500.
///
/// Production shows the generic error page; development adds the panic
/// message.
pub fn panic_response(
    environment: Environment,
    panic: Box<dyn Any + Send + 'static>,
) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %message, "request handler panicked");

    if !environment.is_development() {
        return error_page(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let body = format!(
        "<h1>Error</h1><p>The request handler panicked.</p><pre>{}</pre>",
        escape_html(message)
    );
    (StatusCode::INTERNAL_SERVER_ERROR, layout("Error", None, &body)).into_response()
}
