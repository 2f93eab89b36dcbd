//! Artifact URL parsing and the metadata URL transform.
//!
//! Artifact URLs have the shape `<prefix>/download/<typeId>/<buildId>/<rel>[?q]`;
//! the matching metadata lives at
//! `<prefix>/download/<typeId>/<buildId>/.artimirror/torrents/<rel>.torrent[?q]`.

use std::path::{Path, PathBuf};

use artimirror_torrent_core::layout::{METADATA_EXTENSION, TORRENTS_PREFIX};
use url::Url;

use crate::manifest::MANIFEST_FILE_NAME;

const DOWNLOAD_SEGMENT: &str = "download";

/// Artifact URL split into its build coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifactUrl {
    url: Url,
    prefix: Vec<String>,
    build_type_id: String,
    build_id: String,
    relative: String,
}

impl ParsedArtifactUrl {
    /// Split `url` at its first `download` segment followed by a build type,
    /// build id, and a non-empty artifact path.
    #[must_use]
    pub fn parse(url: &Url) -> Option<Self> {
        let segments: Vec<&str> = url.path_segments()?.collect();
        let start = segments
            .iter()
            .position(|segment| *segment == DOWNLOAD_SEGMENT)?;
        let build_type_id = segments.get(start + 1).filter(|s| !s.is_empty())?;
        let build_id = segments.get(start + 2).filter(|s| !s.is_empty())?;
        let rest: Vec<&str> = segments
            .get(start + 3..)?
            .iter()
            .copied()
            .filter(|segment| !segment.is_empty())
            .collect();
        if rest.is_empty() || rest.iter().any(|segment| matches!(*segment, "." | "..")) {
            return None;
        }
        Some(Self {
            url: url.clone(),
            prefix: segments[..start].iter().map(ToString::to_string).collect(),
            build_type_id: (*build_type_id).to_string(),
            build_id: (*build_id).to_string(),
            relative: rest.join("/"),
        })
    }

    /// Original artifact URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Build configuration identifier.
    #[must_use]
    pub fn build_type_id(&self) -> &str {
        &self.build_type_id
    }

    /// Build identifier.
    #[must_use]
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Artifact path relative to the build's artifact root.
    #[must_use]
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Metadata path relative to the build's artifact root.
    #[must_use]
    pub fn relative_metadata_path(&self) -> String {
        format!("{TORRENTS_PREFIX}/{}.{METADATA_EXTENSION}", self.relative)
    }

    /// URL of the metadata file published next to the artifact.
    ///
    /// The query string of the artifact URL is preserved.
    #[must_use]
    pub fn metadata_url(&self) -> Url {
        let mut path = String::new();
        for segment in &self.prefix {
            if !segment.is_empty() {
                path.push('/');
                path.push_str(segment);
            }
        }
        path.push_str(&format!(
            "/{DOWNLOAD_SEGMENT}/{}/{}/{}",
            self.build_type_id,
            self.build_id,
            self.relative_metadata_path()
        ));
        let mut url = self.url.clone();
        url.set_path(&path);
        url
    }
}

/// Whether `url` names the build's publication manifest.
#[must_use]
pub fn is_manifest_url(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .is_some_and(|last| last == MANIFEST_FILE_NAME)
}

/// Directory that `target` would be the artifact `relative` of.
///
/// Returns `None` when `target` does not end with `relative`.
#[must_use]
pub fn real_root(target: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if !target.ends_with(relative) {
        return None;
    }
    let mut root = target.to_path_buf();
    for _ in relative.components() {
        root.pop();
    }
    Some(root)
}
