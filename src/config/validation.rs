use super::Manifest;
use crate::error::{Error, Result};
use std::collections::HashSet;

impl Manifest {
    /// Validate structural consistency of the manifest.
    ///
    /// Dependency cycles are detected later by the dependency graph; this
    /// checks references and uniqueness only.
    pub fn validate(&self) -> Result<()> {
        if self.app.name.trim().is_empty() {
            return Err(Error::Manifest("app.name must not be empty".to_string()));
        }

        let mut service_ids = HashSet::new();
        for service in &self.services {
            if service.id.trim().is_empty() {
                return Err(Error::Manifest("Service id must not be empty".to_string()));
            }
            if !service_ids.insert(service.id.as_str()) {
                return Err(Error::Manifest(format!(
                    "Duplicate service id '{}'",
                    service.id
                )));
            }
        }

        let mut secret_ids = HashSet::new();
        for secret in &self.secrets {
            if !secret_ids.insert(secret.id.as_str()) {
                return Err(Error::Manifest(format!(
                    "Duplicate secret id '{}'",
                    secret.id
                )));
            }
        }

        for service in &self.services {
            for dep in &service.dependencies {
                if !service_ids.contains(dep.as_str()) {
                    return Err(Error::Manifest(format!(
                        "Service '{}' depends on unknown service '{}'",
                        service.id, dep
                    )));
                }
            }

            let mut port_names = HashSet::new();
            for request in &service.ports.requested {
                if !port_names.insert(request.name.as_str()) {
                    return Err(Error::Manifest(format!(
                        "Service '{}' requests port '{}' more than once",
                        service.id, request.name
                    )));
                }
            }

            let mut versions = HashSet::new();
            for migration in &service.migrations {
                if !versions.insert(migration.version.as_str()) {
                    return Err(Error::Manifest(format!(
                        "Service '{}' declares migration version '{}' more than once",
                        service.id, migration.version
                    )));
                }
                if migration.command.is_empty() {
                    return Err(Error::Manifest(format!(
                        "Migration '{}' of service '{}' has an empty command",
                        migration.version, service.id
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ManifestFormat, Parser};
    use crate::error::Error;

    fn parse(json: &str) -> crate::config::Manifest {
        Parser::new()
            .parse_manifest(json, ManifestFormat::Json)
            .unwrap()
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let manifest = parse(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "api", "dependencies": ["ghost"]}]}"#,
        );
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, Error::Manifest(ref m) if m.contains("ghost")));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let manifest = parse(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "api"}, {"id": "api"}]}"#,
        );
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_duplicate_migration_version_rejected() {
        let manifest = parse(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "db", "migrations": [
                    {"version": "001", "command": ["init"]},
                    {"version": "001", "command": ["again"]}
                ]}]}"#,
        );
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("001"));
    }

    #[test]
    fn test_duplicate_port_name_rejected() {
        let manifest = parse(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "api", "ports": {"requested": [{"name": "http"}, {"name": "http"}]}}]}"#,
        );
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_self_dependency_passes_reference_check() {
        // cycles are reported by the dependency graph, not here
        let manifest = parse(
            r#"{"app": {"name": "a", "version": "1"},
                "services": [{"id": "api", "dependencies": ["api"]}]}"#,
        );
        assert!(manifest.validate().is_ok());
    }
}
