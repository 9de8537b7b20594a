//! Dispatch/gateway handshake: locates the categorized resource manifests
//! and the revision they are pinned to.

use crate::error::Error;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

const REVISION_START_MARK: &str = "output_";
const REVISION_END_MARK: &str = "/client";

/// Manifest kinds announced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileInfoKind {
    Base,
    Data,
    Silence,
    Res,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInfo {
    pub base_url: String,
    pub revision_stamp: String,
    #[serde(default)]
    pub file_list: String,
}

impl CategoryInfo {
    /// Absolute URL of this category's file list.
    pub fn file_list_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.file_list.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GatewayFiles {
    base: Option<CategoryInfo>,
    data: Option<CategoryInfo>,
    silence: Option<CategoryInfo>,
    res: Option<CategoryInfo>,
    audio: Option<CategoryInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayResponse {
    retcode: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    files: GatewayFiles,
}

/// Decoded gateway answer.
#[derive(Debug, Clone)]
pub struct GatewayInfo {
    source: String,
    files: GatewayFiles,
}

impl GatewayInfo {
    pub fn decode(source: &str, data: &[u8]) -> Result<Self, Error> {
        let response: GatewayResponse = serde_json::from_slice(data)
            .map_err(|e| Error::format(source, e.to_string()))?;
        if response.retcode != 0 {
            return Err(Error::NotFound(format!(
                "gateway {} refused with retcode {}: {}",
                source, response.retcode, response.message
            )));
        }
        Ok(Self {
            source: source.to_string(),
            files: response.files,
        })
    }

    pub fn category(&self, kind: FileInfoKind) -> Result<&CategoryInfo, Error> {
        let info = match kind {
            FileInfoKind::Base => &self.files.base,
            FileInfoKind::Data => &self.files.data,
            FileInfoKind::Silence => &self.files.silence,
            FileInfoKind::Res => &self.files.res,
            FileInfoKind::Audio => &self.files.audio,
        };
        info.as_ref().ok_or_else(|| {
            Error::NotFound(format!("gateway {} has no {:?} manifest", self.source, kind))
        })
    }

    /// CDN root pinned to the base revision.
    pub fn base_res_url(&self) -> Result<String, Error> {
        let base = self.category(FileInfoKind::Base)?;
        pin_revision_url(&base.base_url, &base.revision_stamp)
    }
}

/// Rewrite `.../output_<anything>/client...` to `.../output_<revision>/client...`.
///
/// The span from the first `output_` up to the first `/client` after it is
/// replaced; either marker missing is a format error.
pub fn pin_revision_url(base_url: &str, revision: &str) -> Result<String, Error> {
    let start = base_url.find(REVISION_START_MARK);
    let end = start.and_then(|s| base_url[s..].find(REVISION_END_MARK).map(|e| s + e));

    match (start, end) {
        (Some(start), Some(end)) => Ok(format!(
            "{}{}{}{}",
            &base_url[..start],
            REVISION_START_MARK,
            revision,
            &base_url[end..]
        )),
        _ => Err(Error::format(
            base_url,
            format!(
                "revision markers not found (start: {:?}, end: {:?})",
                start, end
            ),
        )),
    }
}

/// Look up the repository URL for `version` in a version metadata document
/// (`{"<version>": "<url>"}`).
pub fn resolve_repo_url(source: &str, data: &[u8], version: &str) -> Result<String, Error> {
    let metadata: HashMap<String, String> = serde_json::from_slice(data)
        .map_err(|e| Error::format(source, e.to_string()))?;
    metadata.get(version).cloned().ok_or_else(|| {
        Error::NotFound(format!("no manifest for version {} in {}", version, source))
    })
}

/// Run `op` against `primary`; on failure try `fallback` exactly once.
/// Cancellation is never retried.
pub fn with_fallback<T>(
    primary: &str,
    fallback: Option<&str>,
    mut op: impl FnMut(&str) -> Result<T, Error>,
) -> Result<T, Error> {
    match op(primary) {
        Ok(value) => Ok(value),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => match fallback {
            Some(fallback) if !fallback.is_empty() && fallback != primary => {
                warn!("{} failed ({}), trying fallback {}", primary, e, fallback);
                op(fallback)
            }
            _ => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: &str = r#"{
        "retcode": 0,
        "message": "OK",
        "files": {
            "base": {"baseUrl": "https://cdn/x/output_100_abc/client/StandaloneWindows64", "revisionStamp": "200"},
            "res": {"baseUrl": "https://cdn/x/output_200_def/client/StandaloneWindows64", "revisionStamp": "200", "fileList": "res_list"},
            "audio": {"baseUrl": "https://cdn/x/output_200_def/client/StandaloneWindows64/", "revisionStamp": "200", "fileList": "/audio_list"}
        }
    }"#;

    #[test]
    fn test_pin_revision_url() {
        assert_eq!(
            pin_revision_url("https://cdn/x/output_old/abc/client/y", "42").unwrap(),
            "https://cdn/x/output_42/client/y"
        );
    }

    #[test]
    fn test_pin_revision_url_missing_markers() {
        assert!(matches!(
            pin_revision_url("https://cdn/x/old/abc/client/y", "42"),
            Err(Error::Format { .. })
        ));
        assert!(matches!(
            pin_revision_url("https://cdn/x/output_old/abc/y", "42"),
            Err(Error::Format { .. })
        ));
        // end mark only counts after the start mark
        assert!(matches!(
            pin_revision_url("https://cdn/client/output_old", "42"),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_gateway_decode() {
        let info = GatewayInfo::decode("gateway", GATEWAY.as_bytes()).unwrap();
        let res = info.category(FileInfoKind::Res).unwrap();
        assert_eq!(
            res.file_list_url(),
            "https://cdn/x/output_200_def/client/StandaloneWindows64/res_list"
        );
        assert_eq!(
            info.category(FileInfoKind::Audio).unwrap().file_list_url(),
            "https://cdn/x/output_200_def/client/StandaloneWindows64/audio_list"
        );
        assert_eq!(
            info.base_res_url().unwrap(),
            "https://cdn/x/output_200/client/StandaloneWindows64"
        );
        assert!(matches!(
            info.category(FileInfoKind::Silence),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_gateway_refusal_is_not_found() {
        let body = r#"{"retcode": -1, "message": "no such server"}"#;
        assert!(matches!(
            GatewayInfo::decode("gateway", body.as_bytes()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            GatewayInfo::decode("gateway", b"<html>"),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_resolve_repo_url() {
        let body = br#"{"4.0.0": "https://repo/4.0.0", "4.1.0": "https://repo/4.1.0"}"#;
        assert_eq!(
            resolve_repo_url("metadata", body, "4.1.0").unwrap(),
            "https://repo/4.1.0"
        );
        assert!(matches!(
            resolve_repo_url("metadata", body, "9.9.9"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_fallback_retries_exactly_once() {
        let mut calls = Vec::new();
        let result: Result<(), Error> = with_fallback("primary", Some("fallback"), |url| {
            calls.push(url.to_string());
            Err(Error::NotFound(url.to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, vec!["primary", "fallback"]);
    }

    #[test]
    fn test_fallback_success_and_absence() {
        let value = with_fallback("primary", Some("fallback"), |url| {
            if url == "primary" {
                Err(Error::network(url, "down"))
            } else {
                Ok(7)
            }
        })
        .unwrap();
        assert_eq!(value, 7);

        let mut calls = 0;
        let result: Result<(), Error> = with_fallback("primary", None, |url| {
            calls += 1;
            Err(Error::NotFound(url.to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_fallback_skipped_on_cancel() {
        let mut calls = 0;
        let result: Result<(), Error> = with_fallback("primary", Some("fallback"), |_| {
            calls += 1;
            Err(Error::Cancelled)
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls, 1);
    }
}
