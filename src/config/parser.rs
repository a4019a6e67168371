use super::Manifest;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Manifest file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    /// JSON unless the extension is `.yaml` or `.yml`.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ManifestFormat::Yaml
            }
            _ => ManifestFormat::Json,
        }
    }
}

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Load and validate a manifest from a file path.
    pub fn load_manifest<P: AsRef<Path>>(&self, path: P) -> Result<Manifest> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Manifest(format!(
                "Failed to read manifest '{}': {}",
                path.display(),
                e
            ))
        })?;

        let manifest = self.parse_manifest(&content, ManifestFormat::from_path(path))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest without validating it.
    pub fn parse_manifest(&self, content: &str, format: ManifestFormat) -> Result<Manifest> {
        match format {
            ManifestFormat::Json => serde_json::from_str(content)
                .map_err(|e| Error::Manifest(format!("Failed to parse JSON manifest: {}", e))),
            ManifestFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| Error::Manifest(format!("Failed to parse YAML manifest: {}", e))),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_manifest() {
        let json = r#"{
            "app": {"name": "notes", "version": "2.1.0"},
            "services": [
                {"id": "db", "binaries": {"default": {"path": "bin/db"}}},
                {"id": "api", "dependencies": ["db"],
                 "binaries": {"default": {"path": "bin/api", "args": ["--port", "${api.http}"]}},
                 "ports": {"requested": [{"name": "http"}]}}
            ]
        }"#;

        let manifest = Parser::new()
            .parse_manifest(json, ManifestFormat::Json)
            .unwrap();
        assert_eq!(manifest.app.name, "notes");
        assert_eq!(manifest.services.len(), 2);
        assert_eq!(manifest.services[1].dependencies, vec!["db".to_string()]);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml_manifest() {
        let yaml = r#"
app:
  name: notes
  version: 1.0.0
services:
  - id: worker
    binaries:
      default:
        path: worker
    readiness:
      type: port_open
      port_name: rpc
      timeout: 30s
"#;
        let manifest = Parser::new()
            .parse_manifest(yaml, ManifestFormat::Yaml)
            .unwrap();
        let readiness = manifest.services[0].readiness.as_ref().unwrap();
        assert_eq!(readiness.timeout(), std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_corrupt_manifest_is_manifest_error() {
        let err = Parser::new()
            .parse_manifest("{not json", ManifestFormat::Json)
            .unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ManifestFormat::from_path(Path::new("bundle.yml")),
            ManifestFormat::Yaml
        );
        assert_eq!(
            ManifestFormat::from_path(Path::new("bundle.YAML")),
            ManifestFormat::Yaml
        );
        assert_eq!(
            ManifestFormat::from_path(Path::new("manifest.json")),
            ManifestFormat::Json
        );
        assert_eq!(
            ManifestFormat::from_path(Path::new("manifest")),
            ManifestFormat::Json
        );
    }
}
