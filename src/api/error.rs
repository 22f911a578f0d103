use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::dns::DnsError;
use crate::probes::ProbeError;
use crate::settings::SettingsError;

/// Every handler failure renders as `{ "error": message }`.
#[derive(Debug)]
pub enum ApiError {
    Dns(DnsError),
    Probe(ProbeError),
    Settings(SettingsError),
    BadRequest(String),
    NotFound,
}

impl From<DnsError> for ApiError {
    fn from(err: DnsError) -> Self {
        Self::Dns(err)
    }
}

impl From<ProbeError> for ApiError {
    fn from(err: ProbeError) -> Self {
        Self::Probe(err)
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        Self::Settings(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Dns(e) => match e {
                DnsError::InvalidInput(_) | DnsError::UnsupportedType(_) => StatusCode::BAD_REQUEST,
                // An authoritative "no such name" is an answer, not a failure.
                DnsError::ResolutionFailure(_) => StatusCode::OK,
                DnsError::TransientQuery(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Probe(e) => match e {
                ProbeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ProbeError::ResolutionFailure(_) => StatusCode::NOT_FOUND,
                ProbeError::Launch(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ProbeError::StreamUnsupported => StatusCode::NOT_ACCEPTABLE,
            },
            ApiError::Settings(e) => match e {
                SettingsError::Empty | SettingsError::InvalidServer(_) => StatusCode::BAD_REQUEST,
                SettingsError::Duplicate(_) => StatusCode::CONFLICT,
                SettingsError::NotFound(_) => StatusCode::NOT_FOUND,
                SettingsError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Dns(e) => e.to_string(),
            ApiError::Probe(e) => e.to_string(),
            ApiError::Settings(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotFound => "not found".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.message(), %status, "request failed");
        } else {
            tracing::debug!(error = %self.message(), %status, "request rejected");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
