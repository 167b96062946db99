use serde::{Deserialize, Serialize};

use crate::model::ResultRecord;
use crate::search::SerializedIndex;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetAllRequest {
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetAllResponse {
    pub results: Vec<ResultRecord>,
    #[serde(rename = "fuseIndex", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<SerializedIndex>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentTabsResponse {
    pub results: Vec<ResultRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchFaviconRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FetchFaviconResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTabRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchTabRequest {
    pub tab_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmptyResponse {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "body", rename_all = "kebab-case")]
pub enum Request {
    GetAll(GetAllRequest),
    GetRecentTabs,
    FetchFavicon(FetchFaviconRequest),
    NewTab(NewTabRequest),
    OpenResult(ResultRecord),
    SwitchTab(SwitchTabRequest),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAll(_) => "get-all",
            Self::GetRecentTabs => "get-recent-tabs",
            Self::FetchFavicon(_) => "fetch-favicon",
            Self::NewTab(_) => "new-tab",
            Self::OpenResult(_) => "open-result",
            Self::SwitchTab(_) => "switch-tab",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", content = "body", rename_all = "kebab-case")]
pub enum Response {
    GetAll(GetAllResponse),
    GetRecentTabs(RecentTabsResponse),
    FetchFavicon(FetchFaviconResponse),
    NewTab(ActionResponse),
    OpenResult(ActionResponse),
    SwitchTab(EmptyResponse),
}

/// Background → page control messages. Neither carries a payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlSignal {
    CleanupOldContext,
    ReinjectContext,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlAck {
    pub success: bool,
}

/// Who sent a request; `tab_id` is absent for non-page senders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sender {
    pub tab_id: Option<i64>,
}

impl Sender {
    pub fn tab(tab_id: i64) -> Self {
        Self {
            tab_id: Some(tab_id),
        }
    }
}
