//! Opaque, reversible path segments for upstream-hosted assets.
//!
//! Generated media lives on the upstream's asset host, which clients cannot
//! reach without upstream credentials. Every asset URL handed to a client is
//! rewritten to `<base>/images/<segment>`, where the segment encodes the
//! original locator and is resolved later by the asset proxy.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::BridgeError;

const URL_PREFIX: &str = "u_";
const PATH_PREFIX: &str = "p_";
const IMAGES_ROUTE: &str = "/images/";

/// Decoded form of an asset segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef {
    /// Full absolute URL, query string included.
    Url(String),
    /// Path on the upstream asset host, always starting with `/`.
    Path(String),
}

/// Encode an asset URL or bare path into an opaque proxy segment.
///
/// The input is encoded as given; callers trim upstream values beforehand.
#[must_use]
pub fn encode_asset_path(raw: &str) -> String {
    if url::Url::parse(raw).is_ok() {
        let mut out = String::with_capacity(URL_PREFIX.len() + raw.len() * 4 / 3 + 4);
        out.push_str(URL_PREFIX);
        URL_SAFE_NO_PAD.encode_string(raw.as_bytes(), &mut out);
        return out;
    }

    let mut out = String::with_capacity(PATH_PREFIX.len() + raw.len() * 4 / 3 + 6);
    out.push_str(PATH_PREFIX);
    if raw.starts_with('/') {
        URL_SAFE_NO_PAD.encode_string(raw.as_bytes(), &mut out);
    } else {
        let mut path = String::with_capacity(raw.len() + 1);
        path.push('/');
        path.push_str(raw);
        URL_SAFE_NO_PAD.encode_string(path.as_bytes(), &mut out);
    }
    out
}

/// Reverse of [`encode_asset_path`], as performed by the asset proxy.
///
/// # Errors
///
/// Returns [`BridgeError::Translation`] for an unknown prefix or a payload that
/// is not valid base64/UTF-8.
pub fn decode_asset_path(segment: &str) -> Result<AssetRef, BridgeError> {
    let (is_url, payload) = if let Some(rest) = segment.strip_prefix(URL_PREFIX) {
        (true, rest)
    } else if let Some(rest) = segment.strip_prefix(PATH_PREFIX) {
        (false, rest)
    } else {
        return Err(BridgeError::Translation(format!(
            "unknown asset segment prefix in '{segment}'"
        )));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| BridgeError::Translation(format!("invalid asset segment: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| BridgeError::Translation(format!("asset segment is not UTF-8: {e}")))?;
    Ok(if is_url {
        AssetRef::Url(text)
    } else {
        AssetRef::Path(text)
    })
}

/// Builds public proxy URLs for upstream assets.
#[derive(Debug, Clone)]
pub struct AssetLinker {
    base: Option<String>,
}

impl AssetLinker {
    /// `asset_base_url` wins over the request origin; both may be absent.
    #[must_use]
    pub fn new(asset_base_url: Option<&str>, request_origin: Option<&str>) -> Self {
        let base = asset_base_url
            .or(request_origin)
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(|base| base.trim_end_matches('/').to_owned());
        Self { base }
    }

    /// Rewrite `raw` to `<base>/images/<segment>`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when neither a base URL nor a request
    /// origin was supplied.
    pub fn link(&self, raw: &str) -> Result<String, BridgeError> {
        let Some(base) = self.base.as_deref() else {
            return Err(BridgeError::Config(
                "no asset base URL configured and no request origin available".to_string(),
            ));
        };
        let segment = encode_asset_path(raw);
        let mut out = String::with_capacity(base.len() + IMAGES_ROUTE.len() + segment.len());
        out.push_str(base);
        out.push_str(IMAGES_ROUTE);
        out.push_str(&segment);
        Ok(out)
    }
}
