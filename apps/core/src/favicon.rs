use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::fetch::{FetchError, FetchRequest, HttpClient, HttpResponse};
use crate::storage::KvStore;

pub const FAVICON_KEY_PREFIX: &str = "favicon_";
const HTML_MAX_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaviconSettings {
    pub image_timeout: Duration,
    pub html_timeout: Duration,
    pub max_bytes: usize,
    /// Lookup-by-domain service, `{domain}` is replaced with the page host.
    pub service_url: String,
}

impl Default for FaviconSettings {
    fn default() -> Self {
        Self {
            image_timeout: Duration::from_secs(10),
            html_timeout: Duration::from_secs(5),
            max_bytes: 1024 * 1024,
            service_url: "https://www.google.com/s2/favicons?domain={domain}&sz=64".to_string(),
        }
    }
}

impl FaviconSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            image_timeout: Duration::from_millis(config.favicon_image_timeout_ms),
            html_timeout: Duration::from_millis(config.favicon_html_timeout_ms),
            max_bytes: config.favicon_max_bytes,
            service_url: config.favicon_service_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaviconSource {
    /// The hint already was a `data:` URL.
    Inline,
    ExactCache,
    HostCache,
    Hint,
    HtmlLink,
    RootIcon,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFavicon {
    pub data_url: String,
    pub source: FaviconSource,
}

/// `favicon_<host><path>`, or the raw input when it is not a URL.
pub fn exact_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!("{FAVICON_KEY_PREFIX}{}{}", host_with_port(&parsed), parsed.path()),
        Err(_) => format!("{FAVICON_KEY_PREFIX}{url}"),
    }
}

/// `favicon_<host>`, or the raw input when it is not a URL.
pub fn host_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!("{FAVICON_KEY_PREFIX}{}", host_with_port(&parsed)),
        Err(_) => format!("{FAVICON_KEY_PREFIX}{url}"),
    }
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

pub fn is_inline(value: &str) -> bool {
    value.trim_start().starts_with("data:")
}

/// Href of the first `<link>` whose `rel` mentions `icon`.
pub fn find_icon_href(html: &str) -> Option<String> {
    static LINK_TAG: OnceLock<Option<Regex>> = OnceLock::new();
    static ATTR: OnceLock<Option<Regex>> = OnceLock::new();
    let link_tag = LINK_TAG
        .get_or_init(|| Regex::new(r"(?is)<link\b[^>]*>").ok())
        .as_ref()?;
    let attr = ATTR
        .get_or_init(|| {
            Regex::new(r#"(?is)\b(rel|href)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).ok()
        })
        .as_ref()?;

    for tag in link_tag.find_iter(html) {
        let mut rel = None;
        let mut href = None;
        for caps in attr.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().trim().to_string());
            match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
                Some("rel") => rel = value,
                Some("href") => href = value,
                _ => {}
            }
        }
        let is_icon = rel
            .map(|r| r.to_ascii_lowercase().contains("icon"))
            .unwrap_or(false);
        if let (true, Some(href)) = (is_icon, href.filter(|h| !h.is_empty())) {
            return Some(href);
        }
    }
    None
}

/// Validates an image response and encodes it as a `data:` URL.
pub fn to_data_url(
    url: &str,
    response: &HttpResponse,
    max_bytes: usize,
) -> Result<String, FetchError> {
    if !response.is_ok() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status,
        });
    }
    if response.body.len() > max_bytes {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            limit: max_bytes,
        });
    }
    let mime = response.mime();
    match mime.as_deref() {
        Some(m) if m.starts_with("image/") => {
            Ok(format!("data:{m};base64,{}", STANDARD.encode(&response.body)))
        }
        _ => Err(FetchError::NotImage {
            url: url.to_string(),
            content_type: response.content_type.clone(),
        }),
    }
}

/// Exact cache → hint → host cache → page `<link rel=icon>` → `/favicon.ico`
/// → lookup service, with every success persisted. Entries never expire.
pub struct FaviconResolver {
    http: Arc<dyn HttpClient>,
    store: Arc<KvStore>,
    settings: FaviconSettings,
}

impl FaviconResolver {
    pub fn new(http: Arc<dyn HttpClient>, store: Arc<KvStore>, settings: FaviconSettings) -> Self {
        Self {
            http,
            store,
            settings,
        }
    }

    pub async fn resolve(
        &self,
        page_url: Option<&str>,
        hint: Option<&str>,
    ) -> Option<ResolvedFavicon> {
        let page_url = page_url.map(str::trim).filter(|u| !u.is_empty());
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());

        if let Some(inline) = hint.filter(|h| is_inline(h)) {
            return Some(ResolvedFavicon {
                data_url: inline.to_string(),
                source: FaviconSource::Inline,
            });
        }

        let cache_url = page_url.or(hint)?;
        if let Some(data_url) = self.read(&exact_key(cache_url)) {
            return Some(ResolvedFavicon {
                data_url,
                source: FaviconSource::ExactCache,
            });
        }

        let page = page_url.and_then(|u| Url::parse(u).ok());

        if let Some(hint) = hint {
            let target = match &page {
                Some(base) => base
                    .join(hint)
                    .map(String::from)
                    .unwrap_or_else(|_| hint.to_string()),
                None => hint.to_string(),
            };
            match self.fetch_image(&target).await {
                Ok(data_url) => {
                    return Some(self.remember(cache_url, data_url, FaviconSource::Hint))
                }
                Err(error) => debug!(%error, stage = "hint", "favicon stage failed"),
            }
        }

        if let Some(data_url) = self.read(&host_key(cache_url)) {
            return Some(ResolvedFavicon {
                data_url,
                source: FaviconSource::HostCache,
            });
        }

        let page = page.filter(|u| matches!(u.scheme(), "http" | "https"))?;

        match self.from_html(&page).await {
            Ok(data_url) => {
                return Some(self.remember(cache_url, data_url, FaviconSource::HtmlLink))
            }
            Err(error) => debug!(%error, stage = "html", "favicon stage failed"),
        }

        let root = format!("{}/favicon.ico", page.origin().ascii_serialization());
        match self.fetch_image(&root).await {
            Ok(data_url) => {
                return Some(self.remember(cache_url, data_url, FaviconSource::RootIcon))
            }
            Err(error) => debug!(%error, stage = "root", "favicon stage failed"),
        }

        let domain = page.host_str().unwrap_or_default();
        let service = self.settings.service_url.replace("{domain}", domain);
        match self.fetch_image(&service).await {
            Ok(data_url) => return Some(self.remember(cache_url, data_url, FaviconSource::Service)),
            Err(error) => debug!(%error, stage = "service", "favicon stage failed"),
        }

        None
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(error) => {
                warn!(%error, key, "favicon cache read failed");
                None
            }
        }
    }

    fn remember(&self, url: &str, data_url: String, source: FaviconSource) -> ResolvedFavicon {
        if let Err(error) = self.store.set(&exact_key(url), &data_url) {
            warn!(%error, url, "favicon cache write failed");
        }
        let host = host_key(url);
        if self.read(&host).is_none() {
            if let Err(error) = self.store.set(&host, &data_url) {
                warn!(%error, url, "favicon host cache write failed");
            }
        }
        ResolvedFavicon { data_url, source }
    }

    async fn from_html(&self, page: &Url) -> Result<String, FetchError> {
        let response = self
            .fetch(page.as_str(), self.settings.html_timeout, HTML_MAX_BYTES)
            .await?;
        if !response.is_ok() {
            return Err(FetchError::Status {
                url: page.to_string(),
                status: response.status,
            });
        }
        let html = String::from_utf8_lossy(&response.body);
        let href = find_icon_href(&html).ok_or_else(|| FetchError::Network {
            url: page.to_string(),
            message: "no icon link in page".to_string(),
        })?;
        let icon_url = page
            .join(&href)
            .map_err(|_| FetchError::InvalidUrl(href.clone()))?;
        self.fetch_image(icon_url.as_str()).await
    }

    async fn fetch_image(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .fetch(url, self.settings.image_timeout, self.settings.max_bytes)
            .await?;
        to_data_url(url, &response, self.settings.max_bytes)
    }

    /// Dropping the request future on expiry cancels it together with its timer.
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<HttpResponse, FetchError> {
        let request = FetchRequest {
            url: url.to_string(),
            timeout,
            max_bytes,
        };
        match tokio::time::timeout(timeout, self.http.get(&request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
