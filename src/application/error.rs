use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{application::chart::ChartError, infra::error::InfraError};

/// Diagnostic detail attached to error responses and consumed by the
/// response-logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// JSON error body shared by every API route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub error_code: u32,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.public_message.to_string(),
            error_code: u32::from(self.status.as_u16()),
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}

fn chart_status(error: &ChartError) -> StatusCode {
    match error {
        ChartError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ChartError::Authorization(_) => StatusCode::FORBIDDEN,
        ChartError::DatapackNotFound(_) => StatusCode::NOT_FOUND,
        ChartError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChartError::QueueTimeout(_) => StatusCode::REQUEST_TIMEOUT,
        ChartError::RendererTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ChartError::MetadataPersist(_)
        | ChartError::SpawnFailure(_)
        | ChartError::RendererReported { .. }
        | ChartError::FinalizationTimeout(_)
        | ChartError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ChartError {
    fn into_response(self) -> Response {
        let status = chart_status(&self);
        let report = ErrorReport::from_error("application::chart::ChartError", status, &self);
        let body = ErrorBody {
            error: self.to_string(),
            error_code: self.code(),
        };
        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

/// Top-level failure of the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Chart(#[from] ChartError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
