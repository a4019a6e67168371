use bundle_runtime::assets::AssetVerifier;
use bundle_runtime::dependency::Graph;
use bundle_runtime::orchestrator::RuntimePaths;
use bundle_runtime::platform::LocalFs;
use bundle_runtime::Manifest;
use std::sync::Arc;

pub fn run_validate(manifest: &Manifest, paths: &RuntimePaths) -> anyhow::Result<()> {
    println!(
        "Validating {} {} in {}...",
        manifest.app.name,
        manifest.app.version,
        paths.bundle_root.display()
    );

    manifest.validate()?;
    let order = Graph::from_manifest(manifest).topological_sort()?;

    let verifier = AssetVerifier::new(paths.bundle_root.clone(), Arc::new(LocalFs));
    let warnings = verifier.validate_bundle(manifest)?;

    println!("Bundle is valid\n");
    println!("Start order:");
    for id in &order {
        println!("  - {}", id);
    }

    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!(
                "  - {}: {} is {} bytes, expected {}",
                warning.service, warning.path, warning.actual, warning.expected
            );
        }
    }

    if !manifest.secrets.is_empty() {
        println!("\nSecrets: {}", manifest.secrets.len());
        for secret in &manifest.secrets {
            let required = if secret.required { "required" } else { "optional" };
            println!("  - {} ({}, {})", secret.id, secret.class, required);
        }
    }

    Ok(())
}
