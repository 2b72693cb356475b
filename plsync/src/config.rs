use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::sync::item::MediaKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("top level must map playlist references to options")]
    NotAMapping,
    #[error("playlist reference must be a string, got {0:?}")]
    NonStringKey(Value),
    #[error("playlist reference is empty")]
    EmptyKey,
    #[error("playlist {0} is configured twice")]
    DuplicateKey(String),
    #[error("options for playlist {reference}: {source}")]
    Options {
        reference: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("playlist {0} has an empty filepath")]
    EmptyFilepath(String),
    #[error("playlist {reference} has unknown format {format:?}")]
    UnknownFormat { reference: String, format: String },
}

/// One playlist paired with its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub reference: String,
    pub output_dir: PathBuf,
    pub media_kind: MediaKind,
}

#[derive(Debug, Deserialize)]
struct CollectionOptions {
    filepath: String,
    #[serde(default)]
    format: Option<String>,
}

pub async fn load_collections(path: &Path) -> Result<Vec<Collection>, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_collections(&raw)
}

/// Collections in file order.
pub fn parse_collections(raw: &str) -> Result<Vec<Collection>, ConfigError> {
    let document: Value = serde_yaml::from_str(raw)?;
    let mapping = match document {
        Value::Null => Mapping::new(),
        Value::Mapping(mapping) => mapping,
        _ => return Err(ConfigError::NotAMapping),
    };

    let mut seen = HashSet::new();
    let mut collections = Vec::with_capacity(mapping.len());
    for (key, options) in mapping {
        let Value::String(key) = key else {
            return Err(ConfigError::NonStringKey(key));
        };
        let reference = key.trim().to_string();
        if reference.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if !seen.insert(reference.clone()) {
            return Err(ConfigError::DuplicateKey(reference));
        }

        let options: CollectionOptions =
            serde_yaml::from_value(options).map_err(|source| ConfigError::Options {
                reference: reference.clone(),
                source,
            })?;
        if options.filepath.trim().is_empty() {
            return Err(ConfigError::EmptyFilepath(reference));
        }
        let media_kind = parse_format(&reference, options.format.as_deref())?;

        collections.push(Collection {
            reference,
            output_dir: PathBuf::from(options.filepath),
            media_kind,
        });
    }
    Ok(collections)
}

fn parse_format(reference: &str, format: Option<&str>) -> Result<MediaKind, ConfigError> {
    let Some(format) = format else {
        return Ok(MediaKind::Audio);
    };
    match format.trim().to_ascii_lowercase().as_str() {
        "" | "audio" => Ok(MediaKind::Audio),
        "video" => Ok(MediaKind::Video),
        _ => Err(ConfigError::UnknownFormat {
            reference: reference.to_string(),
            format: format.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_collections_in_file_order() {
        let collections = parse_collections(
            r#"
"  https://example.com/playlist?list=PL2  ":
  filepath: /music/two
  format: Video
PL1:
  filepath: /music/one
"#,
        )
        .unwrap();

        assert_eq!(
            collections,
            vec![
                Collection {
                    reference: "https://example.com/playlist?list=PL2".to_string(),
                    output_dir: PathBuf::from("/music/two"),
                    media_kind: MediaKind::Video,
                },
                Collection {
                    reference: "PL1".to_string(),
                    output_dir: PathBuf::from("/music/one"),
                    media_kind: MediaKind::Audio,
                },
            ]
        );
    }

    #[test]
    fn empty_document_has_no_collections() {
        assert!(parse_collections("").unwrap().is_empty());
    }

    #[test]
    fn keys_equal_after_trimming_are_duplicates() {
        let err = parse_collections("PL1:\n  filepath: /a\n' PL1':\n  filepath: /b\n").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKey(key) if key == "PL1"));
    }

    #[test]
    fn blank_key_is_rejected() {
        let err = parse_collections("'  ':\n  filepath: /a\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKey));
    }

    #[test]
    fn filepath_is_required() {
        assert!(matches!(
            parse_collections("PL1:\n  format: audio\n").unwrap_err(),
            ConfigError::Options { .. }
        ));
        assert!(matches!(
            parse_collections("PL1:\n  filepath: ''\n").unwrap_err(),
            ConfigError::EmptyFilepath(_)
        ));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = parse_collections("PL1:\n  filepath: /a\n  format: flac\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat { format, .. } if format == "flac"));
    }

    #[test]
    fn list_document_is_rejected() {
        assert!(matches!(
            parse_collections("- PL1\n- PL2\n").unwrap_err(),
            ConfigError::NotAMapping
        ));
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "PL1:\n  filepath: /music\n").unwrap();
        assert_eq!(load_collections(&path).await.unwrap().len(), 1);

        let err = load_collections(&dir.path().join("missing.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
