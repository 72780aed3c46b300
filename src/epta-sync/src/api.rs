//! Release metadata client.
//!
//! Resolves the release manifest (what version is current, which versions are
//! no longer supported) and the per-category delta manifests.

use std::collections::BTreeSet;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::{Category, SyncConfig};
use crate::error::{SyncError, SyncResult};

/// Snapshot of the published release, fetched fresh on every reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    pub latest_version: String,
    pub unsupported_versions: BTreeSet<String>,
    /// Full-install archive, only needed when bootstrapping
    pub archive_url: Option<String>,
}

impl ReleaseManifest {
    /// Whether `version` is on the remote denylist.
    pub fn is_unsupported(&self, version: &str) -> bool {
        self.unsupported_versions.contains(version)
    }
}

/// A file to fetch into the install tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the install dir, `/`-separated as published
    pub relative_path: String,
    pub source_url: String,
}

/// What changed in one category since `from_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaManifest {
    pub category: String,
    pub from_version: String,
    pub to_version: String,
    pub add_entries: Vec<RemoteEntry>,
    /// Paths relative to the install dir
    pub remove_entries: Vec<String>,
}

impl DeltaManifest {
    pub fn is_empty(&self) -> bool {
        self.add_entries.is_empty() && self.remove_entries.is_empty()
    }
}

/// Release manifest as published. Several producers are accepted, including
/// the GitHub "latest release" API.
#[derive(Debug, Default, Deserialize)]
struct RawReleaseManifest {
    latest_version: Option<String>,
    #[serde(rename = "latestVersion")]
    latest_version_camel: Option<String>,
    tag_name: Option<String>,
    name: Option<String>,

    archive_url: Option<String>,
    #[serde(rename = "archiveUrl")]
    archive_url_camel: Option<String>,
    zipball_url: Option<String>,

    unsupported_versions: Option<Vec<String>>,
    #[serde(rename = "unsupportedVersions")]
    unsupported_versions_camel: Option<Vec<String>>,
}

fn first_non_empty(candidates: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
}

impl TryFrom<RawReleaseManifest> for ReleaseManifest {
    type Error = SyncError;

    fn try_from(raw: RawReleaseManifest) -> SyncResult<Self> {
        let latest_version = first_non_empty([
            raw.latest_version,
            raw.latest_version_camel,
            raw.tag_name,
            raw.name,
        ])
        .ok_or_else(|| SyncError::InvalidManifest {
            message: "no version field".to_string(),
        })?;

        let archive_url =
            first_non_empty([raw.archive_url, raw.archive_url_camel, raw.zipball_url]);

        let unsupported_versions = raw
            .unsupported_versions
            .into_iter()
            .chain(raw.unsupported_versions_camel)
            .flatten()
            .collect();

        Ok(Self {
            latest_version,
            unsupported_versions,
            archive_url,
        })
    }
}

/// Delta manifest as published: bare filenames within the category.
#[derive(Debug, Default, Deserialize)]
struct RawDeltaManifest {
    #[serde(default)]
    add: Vec<String>,
    #[serde(default)]
    del: Vec<String>,
}

/// Place a published filename under its category directory.
///
/// The filename is checked on its own first: an empty or `.` name would
/// otherwise resolve to the category directory itself.
fn category_path(target_dir: &str, filename: &str) -> SyncResult<String> {
    epta_common::validate_relative_path(filename)?;
    Ok(format!("{target_dir}/{filename}"))
}

/// Client for release and delta manifests.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: Client,
    release_url: String,
    delta_base_url: String,
    files_base_url: String,
}

impl ReleaseClient {
    /// Create a client for the endpoints named in `config`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = epta_common::manifest_client(config.request_timeout()).map_err(|e| {
            SyncError::Client {
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            client,
            release_url: config.release_url.clone(),
            delta_base_url: config.delta_base_url.trim_end_matches('/').to_string(),
            files_base_url: config.files_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the current release manifest.
    pub async fn fetch_release_manifest(&self) -> SyncResult<ReleaseManifest> {
        let url = &self.release_url;
        tracing::debug!("Fetching release manifest from {}", url);

        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| SyncError::ConnectionFailed {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::ServerError {
                status: status.as_u16(),
                url: url.clone(),
            });
        }

        let raw: RawReleaseManifest =
            response
                .json()
                .await
                .map_err(|e| SyncError::InvalidManifest {
                    message: e.to_string(),
                })?;

        let manifest = ReleaseManifest::try_from(raw)?;
        tracing::info!(
            "Latest release is {} ({} unsupported versions)",
            manifest.latest_version,
            manifest.unsupported_versions.len()
        );
        Ok(manifest)
    }

    /// URL of the delta manifest describing what changed in `category`
    /// since `from_version`.
    pub fn delta_url(&self, category: &str, from_version: &str) -> String {
        format!(
            "{}/{}/{}.json",
            self.delta_base_url,
            urlencoding::encode(category),
            urlencoding::encode(from_version)
        )
    }

    /// URL an addable file of `category` is downloaded from.
    pub fn entry_url(&self, category: &str, filename: &str) -> String {
        let encoded: Vec<_> = filename
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}/{}/{}",
            self.files_base_url,
            urlencoding::encode(category),
            encoded.join("/")
        )
    }

    /// Fetch the delta manifest for `category`, keyed by the installed
    /// version.
    ///
    /// Returns `Ok(None)` when the server has no delta for this category,
    /// which means nothing changed in it.
    pub async fn fetch_delta_manifest(
        &self,
        category: &Category,
        from_version: &str,
        to_version: &str,
    ) -> SyncResult<Option<DeltaManifest>> {
        let url = self.delta_url(&category.name, from_version);
        tracing::debug!("Fetching {} delta from {}", category.name, url);

        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| SyncError::ConnectionFailed {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::info!("No {} delta since {}", category.name, from_version);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SyncError::ServerError {
                status: status.as_u16(),
                url,
            });
        }

        let raw: RawDeltaManifest =
            response
                .json()
                .await
                .map_err(|e| SyncError::InvalidManifest {
                    message: format!("{} delta: {}", category.name, e),
                })?;

        let target_dir = category.target_dir().trim_end_matches('/');
        let add_entries = raw
            .add
            .iter()
            .map(|filename| -> SyncResult<RemoteEntry> {
                Ok(RemoteEntry {
                    relative_path: category_path(target_dir, filename)?,
                    source_url: self.entry_url(&category.name, filename),
                })
            })
            .collect::<SyncResult<_>>()?;
        let remove_entries = raw
            .del
            .iter()
            .map(|filename| category_path(target_dir, filename))
            .collect::<SyncResult<_>>()?;

        Ok(Some(DeltaManifest {
            category: category.name.clone(),
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            add_entries,
            remove_entries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client_for(server: &wiremock::MockServer) -> ReleaseClient {
        ReleaseClient::new(&SyncConfig::default().with_base_url(&server.uri())).unwrap()
    }

    async fn mount_json(server: &wiremock::MockServer, path: &str, body: serde_json::Value) {
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(path))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_raw(body.to_string(), "application/json"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_native_fields() {
        let server = wiremock::MockServer::start().await;
        mount_json(
            &server,
            "/release.json",
            serde_json::json!({
                "latest_version": "v3",
                "unsupported_versions": ["v0", "v1"],
                "archive_url": "http://example/full.zip"
            }),
        )
        .await;

        let manifest = client_for(&server).fetch_release_manifest().await.unwrap();
        assert_eq!(manifest.latest_version, "v3");
        assert!(manifest.is_unsupported("v1"));
        assert!(!manifest.is_unsupported("v2"));
        assert_eq!(manifest.archive_url.as_deref(), Some("http://example/full.zip"));
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_github_shape() {
        let server = wiremock::MockServer::start().await;
        mount_json(
            &server,
            "/release.json",
            serde_json::json!({
                "tag_name": "1.3.0",
                "name": "Release 1.3.0",
                "zipball_url": "http://example/zipball",
                "tarball_url": "http://example/tarball",
                "assets": []
            }),
        )
        .await;

        let manifest = client_for(&server).fetch_release_manifest().await.unwrap();
        assert_eq!(manifest.latest_version, "1.3.0");
        assert!(manifest.unsupported_versions.is_empty());
        assert_eq!(manifest.archive_url.as_deref(), Some("http://example/zipball"));
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_falls_back_to_name() {
        let server = wiremock::MockServer::start().await;
        mount_json(
            &server,
            "/release.json",
            serde_json::json!({"tag_name": "", "name": "nightly-7", "unsupportedVersions": ["a"]}),
        )
        .await;

        let manifest = client_for(&server).fetch_release_manifest().await.unwrap();
        assert_eq!(manifest.latest_version, "nightly-7");
        assert!(manifest.is_unsupported("a"));
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_without_version_is_invalid() {
        let server = wiremock::MockServer::start().await;
        mount_json(&server, "/release.json", serde_json::json!({"assets": []})).await;

        let err = client_for(&server)
            .fetch_release_manifest()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidManifest { .. }));
        assert!(err.is_network_error());
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_server_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/release.json"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_release_manifest()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ServerError { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_unreachable() {
        let config = SyncConfig::default().with_base_url("http://127.0.0.1:9");
        let client = ReleaseClient::new(&config).unwrap();
        let err = client.fetch_release_manifest().await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_fetch_delta_manifest() {
        let server = wiremock::MockServer::start().await;
        mount_json(
            &server,
            "/deltas/mods/v1.json",
            serde_json::json!({"add": ["new.jar"], "del": ["old.jar"]}),
        )
        .await;

        let client = client_for(&server);
        let delta = client
            .fetch_delta_manifest(&Category::new("mods"), "v1", "v2")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delta.category, "mods");
        assert_eq!(delta.from_version, "v1");
        assert_eq!(delta.to_version, "v2");
        assert_eq!(
            delta.add_entries,
            vec![RemoteEntry {
                relative_path: "mods/new.jar".to_string(),
                source_url: format!("{}/files/mods/new.jar", server.uri()),
            }]
        );
        assert_eq!(delta.remove_entries, vec!["mods/old.jar".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_delta_manifest_uses_target_dir() {
        let server = wiremock::MockServer::start().await;
        mount_json(
            &server,
            "/deltas/shaders/v1.json",
            serde_json::json!({"add": ["a.zip"]}),
        )
        .await;

        let category = Category {
            name: "shaders".to_string(),
            target_dir: Some("shaderpacks".to_string()),
        };
        let delta = client_for(&server)
            .fetch_delta_manifest(&category, "v1", "v2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delta.add_entries[0].relative_path, "shaderpacks/a.zip");
        assert!(delta.remove_entries.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_delta_manifest_not_found_is_no_change() {
        let server = wiremock::MockServer::start().await;
        let delta = client_for(&server)
            .fetch_delta_manifest(&Category::new("config"), "v1", "v2")
            .await
            .unwrap();
        assert!(delta.is_none());
    }

    #[tokio::test]
    async fn test_fetch_delta_manifest_server_error_is_failure() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/deltas/mods/v1.json"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_delta_manifest(&Category::new("mods"), "v1", "v2")
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_fetch_delta_manifest_rejects_blank_filenames() {
        let server = wiremock::MockServer::start().await;
        mount_json(&server, "/deltas/mods/v1.json", serde_json::json!({"del": [""]})).await;
        mount_json(&server, "/deltas/config/v1.json", serde_json::json!({"add": ["./"]})).await;

        let client = client_for(&server);
        for name in ["mods", "config"] {
            let err = client
                .fetch_delta_manifest(&Category::new(name), "v1", "v2")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::UnsafePath, "{name}");
        }
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_keeps_version_verbatim() {
        let server = wiremock::MockServer::start().await;
        mount_json(
            &server,
            "/release.json",
            serde_json::json!({"latest_version": " v3 ", "tag_name": "v2"}),
        )
        .await;

        let manifest = client_for(&server).fetch_release_manifest().await.unwrap();
        assert_eq!(manifest.latest_version, " v3 ");
    }

    #[tokio::test]
    async fn test_fetch_release_manifest_skips_blank_version() {
        let server = wiremock::MockServer::start().await;
        mount_json(
            &server,
            "/release.json",
            serde_json::json!({"latest_version": "  ", "tag_name": "v4"}),
        )
        .await;

        let manifest = client_for(&server).fetch_release_manifest().await.unwrap();
        assert_eq!(manifest.latest_version, "v4");
    }

    #[test]
    fn test_entry_url_encodes_segments() {
        let client = ReleaseClient::new(&SyncConfig::default().with_base_url("http://h")).unwrap();
        assert_eq!(
            client.entry_url("mods", "sub dir/a+b.jar"),
            "http://h/files/mods/sub%20dir/a%2Bb.jar"
        );
        assert_eq!(client.delta_url("mods", "v 1"), "http://h/deltas/mods/v%201.json");
    }
}
