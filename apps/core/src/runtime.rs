use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::background::{BackgroundService, ServiceError};
use crate::config::{self, ConfigError};
use crate::contract::{ControlSignal, Request, Sender};
use crate::fetch::{FetchError, ReqwestClient};
use crate::logging;
use crate::sources::{FixtureHost, SourceError};
use crate::storage::{KvStore, StoreError};
use crate::transport::{self, ErrorCode, ErrorResponse, TransportResponse};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("sources error: {0}")]
    Sources(#[from] SourceError),
    #[error("http client error: {0}")]
    Http(#[from] FetchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub config_path: Option<PathBuf>,
    pub sources_path: Option<PathBuf>,
}

pub fn parse_cli_args(args: &[String]) -> Result<RuntimeOptions, String> {
    let mut options = RuntimeOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let slot = match arg.as_str() {
            "--config" => &mut options.config_path,
            "--sources" => &mut options.sources_path,
            other => return Err(format!("unknown argument '{other}'")),
        };
        let value = iter
            .next()
            .filter(|value| !value.starts_with("--"))
            .ok_or_else(|| format!("{arg} requires a path"))?;
        *slot = Some(PathBuf::from(value));
    }
    Ok(options)
}

pub fn run_with_options(options: RuntimeOptions) -> Result<(), RuntimeError> {
    let config = config::load(options.config_path.as_deref())?;
    let wrote_default = !config.config_path.exists();
    if wrote_default {
        config::save(&config)?;
    }
    logging::init(&config.log_level)?;
    if wrote_default {
        info!(path = %config.config_path.display(), "wrote default config");
    }

    let host = match &options.sources_path {
        Some(path) => FixtureHost::load(path)?,
        None => FixtureHost::empty(),
    };
    let store = Arc::new(KvStore::open_from_config(&config)?);
    let http = Arc::new(ReqwestClient::new()?);
    info!(
        config_path = %config.config_path.display(),
        store_path = %config.store_path.display(),
        "startup"
    );
    let service = BackgroundService::new(config, Arc::new(host), http, store)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        serve(&service, stdin, stdout).await
    })?;
    info!("stdin closed; shutting down");
    Ok(())
}

/// One JSON value per line in, one per line out. A line is either a request
/// envelope (`{"name": .., "body": ..}`) or a control signal
/// (`{"type": "cleanup-old-context"}`); an optional `tabId` names the sender.
pub async fn serve<R, W>(
    service: &BackgroundService,
    reader: R,
    mut writer: W,
) -> Result<(), std::io::Error>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut reply = handle_line(service, &line).await;
        reply.push('\n');
        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

pub async fn handle_line(service: &BackgroundService, line: &str) -> String {
    let mut value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(error) => return reject(ErrorCode::InvalidJson, error.to_string()),
    };

    let sender = match value.as_object_mut().and_then(|obj| obj.remove("tabId")) {
        Some(tab_id) => match tab_id.as_i64() {
            Some(id) => Sender::tab(id),
            None => return reject(ErrorCode::InvalidRequest, "tabId must be an integer".into()),
        },
        None => Sender::default(),
    };

    if value.get("type").is_some() {
        return match serde_json::from_value::<ControlSignal>(value) {
            Ok(ControlSignal::CleanupOldContext) => {
                let report = service.broadcast_cleanup().await;
                json!({ "status": "ok", "report": report }).to_string()
            }
            Ok(ControlSignal::ReinjectContext) => {
                let ack = service.handle_reinject(sender).await;
                json!({ "status": "ok", "ack": ack }).to_string()
            }
            Err(error) => reject(ErrorCode::InvalidRequest, error.to_string()),
        };
    }

    match serde_json::from_value::<Request>(value) {
        Ok(request) => {
            transport::encode(&transport::handle_request(service, sender, request).await)
        }
        Err(error) => {
            warn!(%error, "rejected request envelope");
            reject(ErrorCode::InvalidRequest, error.to_string())
        }
    }
}

fn reject(code: ErrorCode, message: String) -> String {
    transport::encode(&TransportResponse::Err {
        error: ErrorResponse { code, message },
    })
}
