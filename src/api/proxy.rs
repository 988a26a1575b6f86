//! Passthrough to the external status service, so pages can read it without cross-origin
//! restrictions.

use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

/// Status routes proxied verbatim, with the query used when the client sends none
pub const PROXIED_ROUTES: [(&str, Option<&str>); 3] = [
    ("/api/active-clients", None),
    ("/status/active-clients", None),
    (
        "/status/usage-average",
        Some(crate::constants::USAGE_AVERAGE_DEFAULT_QUERY),
    ),
];

pub fn upstream_url(base: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{path}", base.trim_end_matches('/'));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }

    url
}

/// GETs `path` from the upstream service and returns its JSON body untouched, whatever the
/// upstream status. Only an unreachable upstream or a body that isn't JSON is an error.
#[instrument(skip(client))]
pub async fn forward(
    client: &reqwest::Client,
    base: &str,
    path: &str,
    query: Option<&str>,
) -> ProxyResult<Value> {
    let url = upstream_url(base, path, query);
    let res = client.get(&url).send().await?;

    if !res.status().is_success() {
        tracing::warn!(code = %res.status(), "non-success response from upstream");
    }

    Ok(res.json::<Value>().await?)
}

pub type ProxyResult<T> = core::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
}
