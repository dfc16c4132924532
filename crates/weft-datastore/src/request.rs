//! Request routing
//!
//! Resolves `/{alias-or-id}/subpath` requests: awaits a pending alias for
//! the first segment, maps it to an internal id (alias map first, raw id
//! second), honors the request headers, and forwards the rest of the path
//! to the realized channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::gc::NodeUpdateKind;
use weft_core::identifiers::Alias;
use weft_core::{WeftError, WeftResult};

use crate::collection::ChannelCollection;

/// Request headers honored by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestHeaders {
    /// Suspend until the addressed store becomes addressable.
    pub wait: bool,
    /// The request came through a handle, not a raw url.
    pub via_handle: bool,
    /// Serve even if the store is tombstoned. Forced on for sub-path
    /// requests, where the store itself is not the subject.
    pub allow_tombstone: bool,
    /// Serve even if GC considers the store inactive.
    pub allow_inactive: bool,
}

impl Default for RequestHeaders {
    fn default() -> Self {
        Self {
            wait: true,
            via_handle: false,
            allow_tombstone: false,
            allow_inactive: false,
        }
    }
}

/// A routed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Absolute url, optionally with a query string.
    pub url: String,
    /// Router headers.
    #[serde(default)]
    pub headers: RequestHeaders,
}

impl ChannelRequest {
    /// A request with default headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: RequestHeaders::default(),
        }
    }

    /// Override the headers.
    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }
}

/// A routed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelResponse {
    /// HTTP-shaped status; 200 on success.
    pub status: u16,
    /// Mime type of `value`.
    pub mime_type: String,
    /// The response body.
    pub value: Value,
}

impl ChannelResponse {
    /// A 200 response carrying a resolved object.
    pub fn ok(value: Value) -> Self {
        Self {
            status: 200,
            mime_type: "weft/object".to_string(),
            value,
        }
    }
}

impl ChannelCollection {
    /// Resolve a `/{alias-or-id}/subpath` request.
    pub async fn request(&self, request: &ChannelRequest) -> WeftResult<ChannelResponse> {
        self.ensure_not_disposed()?;
        let (path, query) = match request.url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request.url.as_str(), None),
        };
        let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let Some(first) = parts.first().copied() else {
            return Err(WeftError::usage(format!(
                "request url has no store segment: {}",
                request.url
            )));
        };

        // No-op when nothing is in flight for this name.
        self.wait_if_pending_alias(&Alias::new(first)).await;
        let internal_id = self.resolve_internal_id(first);

        let mut headers = request.headers;
        if parts.len() > 1 {
            headers.allow_tombstone = true;
        }

        let context = self
            .contexts
            .get_bound_or_remoted(&internal_id, headers.wait)
            .await
            .ok_or_else(|| WeftError::not_found(request.url.clone()))?;

        let trimmed = format!("/{}", parts.join("/"));
        self.runtime
            .gc_node_updated(&trimmed, NodeUpdateKind::Loaded, None)?;

        if context.is_tombstoned() && !headers.allow_tombstone {
            return Err(WeftError::not_found(request.url.clone()));
        }

        let mut sub_url = format!("/{}", parts[1..].join("/"));
        if let Some(query) = query {
            sub_url.push('?');
            sub_url.push_str(query);
        }
        context
            .request(&ChannelRequest {
                url: sub_url,
                headers,
            })
            .await
    }
}
