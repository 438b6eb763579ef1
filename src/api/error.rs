//! HTTP rendering of CAS failures.
//!
//! Login failures always render as a plain error page; they never redirect, so
//! a failed validation cannot be mistaken for a successful one.

use axum::{
    http::{header::LOCATION, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::cas::{AuthorizationDenied, Blocked, LoginError, ProxyFailure, ValidationFailure};

const LOGIN_FAILED: &str = "CAS login failed, please start the login again";

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(err) => {
            error!("Invalid redirect location: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn validation_status(failure: &ValidationFailure) -> StatusCode {
    match failure {
        ValidationFailure::CasRejected { .. } => StatusCode::UNAUTHORIZED,
        ValidationFailure::MalformedResponse(_)
        | ValidationFailure::NetworkError(_)
        | ValidationFailure::ServerError(_) => StatusCode::BAD_GATEWAY,
        ValidationFailure::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(failure) => validation_status(failure),
            Self::Hook(_) => StatusCode::UNAUTHORIZED,
            Self::Session(err) => {
                error!("Session store failed during login: {err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, LOGIN_FAILED.to_string()).into_response()
    }
}

impl IntoResponse for AuthorizationDenied {
    fn into_response(self) -> Response {
        match self {
            Self::MissingSession => {
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string()).into_response()
            }
            Self::UserNotAllowed(_) | Self::AttrNotAllowed(_) => {
                (StatusCode::FORBIDDEN, "Forbidden".to_string()).into_response()
            }
        }
    }
}

impl IntoResponse for Blocked {
    fn into_response(self) -> Response {
        match self {
            Self::Login(url) => found(url.as_str()),
            Self::Denied(denied) => denied.into_response(),
        }
    }
}

impl IntoResponse for ProxyFailure {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotEnabled => StatusCode::NOT_FOUND,
            Self::MissingGrantingTicket => StatusCode::FORBIDDEN,
            Self::InvalidService(_) => StatusCode::BAD_REQUEST,
            Self::TicketDenied(ValidationFailure::CasRejected { .. }) => StatusCode::FORBIDDEN,
            Self::TicketDenied(failure) => validation_status(failure),
            Self::HandshakeFailed(_) => StatusCode::BAD_GATEWAY,
        };
        (status, format!("Proxy ticket unavailable: {self}")).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::HookAbort;

    #[test]
    fn login_errors_never_redirect() {
        let responses = [
            LoginError::Validation(ValidationFailure::NetworkError("timeout".into())),
            LoginError::Validation(ValidationFailure::CasRejected {
                code: "INVALID_TICKET".into(),
                description: String::new(),
            }),
            LoginError::Hook(HookAbort::new("no")),
        ]
        .map(IntoResponse::into_response);

        assert_eq!(responses[0].status(), StatusCode::BAD_GATEWAY);
        assert_eq!(responses[1].status(), StatusCode::UNAUTHORIZED);
        assert_eq!(responses[2].status(), StatusCode::UNAUTHORIZED);
        assert!(responses
            .iter()
            .all(|response| response.headers().get(LOCATION).is_none()));
    }

    #[test]
    fn denials_map_to_401_and_403() {
        assert_eq!(
            AuthorizationDenied::MissingSession.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthorizationDenied::UserNotAllowed("carol".into())
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn found_sets_location() {
        let response = found("/x");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/x");
    }
}
