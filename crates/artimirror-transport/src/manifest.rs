//! Build publication manifest (`artifacts-ivy.xml`).
//!
//! Only two parts of the document matter: the `/ivy-module/info` element
//! (module and revision) and the `/ivy-module/publications/artifact` entries
//! (`name` plus optional `ext`).

use std::collections::{BTreeSet, HashMap};

use artimirror_torrent_core::layout::{METADATA_DIR_NAME, METADATA_EXTENSION, TORRENTS_PREFIX};
use regex::Regex;
use thiserror::Error;

/// File name of the manifest published with every build.
pub const MANIFEST_FILE_NAME: &str = "artifacts-ivy.xml";

const TAG_PATTERN: &str = r"<\s*([A-Za-z][\w:.-]*)\b((?:[^>/]|/[^>])*)/?\s*>";
const ATTRIBUTE_PATTERN: &str = r#"([A-Za-z_:][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#;
const PUBLICATIONS_PATTERN: &str = r"(?s)<\s*publications\b[^>]*>(.*?)<\s*/\s*publications\s*>";

/// Manifest parse failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Built-in pattern failed to compile.
    #[error("manifest pattern failed to compile")]
    Pattern {
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
    /// Document is not UTF-8.
    #[error("manifest is not valid utf-8")]
    NotUtf8,
    /// Document does not contain exactly one `info` element.
    #[error("manifest info element missing or repeated")]
    Info {
        /// Number of `info` elements found.
        found: usize,
    },
    /// Required attribute missing from an element.
    #[error("manifest element missing attribute")]
    MissingAttribute {
        /// Element name.
        element: &'static str,
        /// Attribute name.
        attribute: &'static str,
    },
}

/// Parsed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvyManifest {
    /// Module name from the `info` element.
    pub module: String,
    /// Revision from the `info` element.
    pub revision: String,
    /// Published artifact paths (`name` or `name.ext`), sorted.
    pub artifacts: BTreeSet<String>,
}

impl IvyManifest {
    /// Parse a manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the document is not UTF-8, lacks a single
    /// `info` element, or an element lacks a required attribute.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::NotUtf8)?;
        let tags = compile(TAG_PATTERN)?;
        let attributes = compile(ATTRIBUTE_PATTERN)?;
        let publications = compile(PUBLICATIONS_PATTERN)?;

        let infos: Vec<HashMap<String, String>> = tags
            .captures_iter(text)
            .filter(|caps| &caps[1] == "info")
            .map(|caps| attribute_map(&attributes, &caps[2]))
            .collect();
        let [info] = infos.as_slice() else {
            return Err(ManifestError::Info { found: infos.len() });
        };
        let module = required(info, "info", "module")?;
        let revision = required(info, "info", "revision")?;

        let mut artifacts = BTreeSet::new();
        for block in publications.captures_iter(text) {
            for caps in tags.captures_iter(&block[1]) {
                if &caps[1] != "artifact" {
                    continue;
                }
                let attrs = attribute_map(&attributes, &caps[2]);
                let name = required(&attrs, "artifact", "name")?;
                match attrs.get("ext").filter(|ext| !ext.is_empty()) {
                    Some(ext) => artifacts.insert(format!("{name}.{ext}")),
                    None => artifacts.insert(name),
                };
            }
        }

        Ok(Self {
            module,
            revision,
            artifacts,
        })
    }

    /// Digest reported for the manifest download.
    #[must_use]
    pub fn digest(&self) -> String {
        format!("{MANIFEST_FILE_NAME}_{}_{}", self.module, self.revision)
    }

    /// Published artifacts whose metadata file was published too, mapped to
    /// that metadata path.
    #[must_use]
    pub fn metadata_backed(&self) -> HashMap<String, String> {
        self.artifacts
            .iter()
            .filter(|artifact| !artifact.starts_with(METADATA_DIR_NAME))
            .filter_map(|artifact| {
                let metadata = format!("{TORRENTS_PREFIX}/{artifact}.{METADATA_EXTENSION}");
                self.artifacts
                    .contains(&metadata)
                    .then(|| (artifact.clone(), metadata))
            })
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex, ManifestError> {
    Regex::new(pattern).map_err(|source| ManifestError::Pattern { source })
}

fn attribute_map(attributes: &Regex, raw: &str) -> HashMap<String, String> {
    attributes
        .captures_iter(raw)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            (caps[1].to_string(), unescape(value))
        })
        .collect()
}

fn required(
    attrs: &HashMap<String, String>,
    element: &'static str,
    attribute: &'static str,
) -> Result<String, ManifestError> {
    attrs
        .get(attribute)
        .cloned()
        .ok_or(ManifestError::MissingAttribute { element, attribute })
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ivy-module version="1.3">
  <info organisation="acme" module="bt1" revision="42" />
  <configurations><conf name="default" /></configurations>
  <publications>
    <artifact name="app" type="zip" ext="zip" conf="default" />
    <artifact name="dist/lib" ext="jar" />
    <artifact name="README" ext="" />
    <artifact name=".artimirror/torrents/app.zip" ext="torrent" />
    <artifact name="R&amp;D" ext="txt" />
  </publications>
</ivy-module>"#;

    #[test]
    fn parses_info_and_publications() -> Result<(), ManifestError> {
        let manifest = IvyManifest::parse(SAMPLE.as_bytes())?;
        assert_eq!(manifest.module, "bt1");
        assert_eq!(manifest.revision, "42");
        assert_eq!(manifest.digest(), "artifacts-ivy.xml_bt1_42");
        assert!(manifest.artifacts.contains("app.zip"));
        assert!(manifest.artifacts.contains("dist/lib.jar"));
        assert!(manifest.artifacts.contains("README"));
        assert!(manifest.artifacts.contains("R&D.txt"));
        assert!(!manifest.artifacts.contains("default"));

        let backed = manifest.metadata_backed();
        assert_eq!(backed.len(), 1);
        assert_eq!(
            backed.get("app.zip").map(String::as_str),
            Some(".artimirror/torrents/app.zip.torrent")
        );
        Ok(())
    }

    #[test]
    fn rejects_documents_without_info() {
        let result = IvyManifest::parse(b"<ivy-module><publications/></ivy-module>");
        assert!(matches!(result, Err(ManifestError::Info { found: 0 })));
        assert!(matches!(
            IvyManifest::parse(&[0xff, 0xfe]),
            Err(ManifestError::NotUtf8)
        ));
    }
}
