use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::pending_changes::PendingChangesError;
use crate::workflows::preload::{PreloadListError, StoreError};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Store(StoreError),
    Http(reqwest::Error),
    PreloadList(PreloadListError),
    PendingChanges(PendingChangesError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Store(err) => write!(f, "store error: {}", err),
            AppError::Http(err) => write!(f, "http client error: {}", err),
            AppError::PreloadList(err) => write!(f, "preload list error: {}", err),
            AppError::PendingChanges(err) => write!(f, "update-list error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Http(err) => Some(err),
            AppError::PreloadList(err) => Some(err),
            AppError::PendingChanges(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Internal error: {self}\n"),
        )
            .into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl From<PreloadListError> for AppError {
    fn from(value: PreloadListError) -> Self {
        Self::PreloadList(value)
    }
}

impl From<PendingChangesError> for AppError {
    fn from(value: PendingChangesError) -> Self {
        Self::PendingChanges(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_as_plain_text_internal_error() {
        let err = AppError::from(StoreError::Unavailable("forced failure".into()));
        assert!(std::error::Error::source(&err).is_some());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(
            &body[..],
            b"Internal error: store error: store unavailable: forced failure\n"
        );
    }
}
