use serde::{Deserialize, Serialize};

use crate::background::{BackgroundService, ServiceError};
use crate::contract::{Request, Response, Sender};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidJson,
    InvalidRequest,
    Host,
    Store,
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransportResponse {
    Ok { response: Response },
    Err { error: ErrorResponse },
}

pub async fn handle_request(
    service: &BackgroundService,
    sender: Sender,
    request: Request,
) -> TransportResponse {
    match service.handle(request, sender).await {
        Ok(response) => TransportResponse::Ok { response },
        Err(error) => TransportResponse::Err {
            error: map_service_error(error),
        },
    }
}

pub async fn handle_json(service: &BackgroundService, sender: Sender, payload: &str) -> String {
    let response = match serde_json::from_str::<Request>(payload) {
        Ok(request) => handle_request(service, sender, request).await,
        Err(error) => TransportResponse::Err {
            error: ErrorResponse {
                code: ErrorCode::InvalidJson,
                message: error.to_string(),
            },
        },
    };

    encode(&response)
}

/// Serializes a response; a failure here is reported as an envelope itself.
pub fn encode(response: &TransportResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|error| {
        format!(
            r#"{{"status":"err","error":{{"code":"invalid_request","message":{}}}}}"#,
            serde_json::Value::String(error.to_string())
        )
    })
}

fn map_service_error(error: ServiceError) -> ErrorResponse {
    let code = match &error {
        ServiceError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        ServiceError::Host(_) => ErrorCode::Host,
        ServiceError::Store(_) => ErrorCode::Store,
        ServiceError::Config(_) => ErrorCode::Config,
    };
    ErrorResponse {
        code,
        message: error.to_string(),
    }
}
