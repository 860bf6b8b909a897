//! Desired-state manifest for a function app deployment.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The default name for the crumpet manifest file.
pub const CRUMPET_MANIFEST_FILENAME: &str = "Crumpet.toml";

/// Default management-plane endpoint (public cloud).
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
/// Default authority used for token requests (public cloud).
pub const DEFAULT_AUTHORITY_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Desired state of one function app, as declared in Git.
///
/// Immutable for the duration of a deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionManifest {
    /// Resource group holding the function app.
    pub resource_group: String,
    /// Name of the function app.
    pub function_name: String,
    /// Blob URL of the deployable package.
    pub package_uri: String,
    /// Optional infrastructure template deployed before the code push.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<DeployTemplate>,
}

/// Infrastructure template attached to a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTemplate {
    /// Name under which the deployment is recorded in the resource group.
    pub deployment_name: String,
    /// Template document, relative to the application directory.
    pub template_file: String,
    /// Parameter document, relative to the application directory.
    pub parameter_file: String,
}

/// One deployment target: the subscription a stage execution runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    /// Name used to select this target from the command line.
    pub name: String,
    pub subscription_id: String,
    /// Management-plane endpoint; override for sovereign clouds.
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
    /// Token authority; override for sovereign clouds.
    #[serde(default = "default_authority_endpoint")]
    pub authority_endpoint: String,
}

fn default_management_endpoint() -> String {
    DEFAULT_MANAGEMENT_ENDPOINT.to_string()
}

fn default_authority_endpoint() -> String {
    DEFAULT_AUTHORITY_ENDPOINT.to_string()
}

/// Top-level `Crumpet.toml` document: the function manifest plus the
/// deployment targets it may be pushed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppManifest {
    pub function: FunctionManifest,
    #[serde(default, rename = "target")]
    pub targets: Vec<DeployTarget>,
}

impl AppManifest {
    /// Load the manifest from a TOML file, or from `Crumpet.toml` inside a
    /// directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("manifest file or directory not found: {}", path.display());
        }

        let manifest_path = if path.is_dir() {
            path.join(CRUMPET_MANIFEST_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("failed to read manifest {}", manifest_path.display()))?;
        let manifest: Self =
            toml::from_str(&content).context("failed to parse manifest as TOML")?;
        tracing::info!(path = %manifest_path.display(), "Manifest loaded");
        Ok(manifest)
    }

    /// Targets matching `name`, or every configured target when `name` is
    /// omitted. Stage executors reject anything other than exactly one.
    pub fn select_targets(&self, name: Option<&str>) -> Vec<DeployTarget> {
        match name {
            Some(name) => self
                .targets
                .iter()
                .filter(|t| t.name == name)
                .cloned()
                .collect(),
            None => self.targets.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[function]
resource_group = "demo-rg"
function_name = "demo-func"
package_uri = "https://demosa.blob.core.windows.net/packages/app.zip"

[function.template]
deployment_name = "demo-deployment"
template_file = "azuredeploy.json"
parameter_file = "azuredeploy.parameters.json"

[[target]]
name = "prod"
subscription_id = "00000000-0000-0000-0000-000000000001"

[[target]]
name = "staging"
subscription_id = "00000000-0000-0000-0000-000000000002"
management_endpoint = "https://management.usgovcloudapi.net"
authority_endpoint = "https://login.microsoftonline.us"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest: AppManifest = toml::from_str(MANIFEST).unwrap();

        assert_eq!(manifest.function.resource_group, "demo-rg");
        assert_eq!(manifest.function.function_name, "demo-func");
        let template = manifest.function.template.as_ref().unwrap();
        assert_eq!(template.deployment_name, "demo-deployment");
        assert_eq!(manifest.targets.len(), 2);
    }

    #[test]
    fn test_endpoints_default_to_public_cloud() {
        let manifest: AppManifest = toml::from_str(MANIFEST).unwrap();

        assert_eq!(
            manifest.targets[0].management_endpoint,
            DEFAULT_MANAGEMENT_ENDPOINT
        );
        assert_eq!(
            manifest.targets[1].management_endpoint,
            "https://management.usgovcloudapi.net"
        );
    }

    #[test]
    fn test_template_section_is_optional() {
        let manifest: AppManifest = toml::from_str(
            r#"
[function]
resource_group = "demo-rg"
function_name = "demo-func"
package_uri = "https://demosa.blob.core.windows.net/packages/app.zip"
"#,
        )
        .unwrap();

        assert!(manifest.function.template.is_none());
        assert!(manifest.targets.is_empty());
    }

    #[test]
    fn test_select_targets_by_name() {
        let manifest: AppManifest = toml::from_str(MANIFEST).unwrap();

        let selected = manifest.select_targets(Some("prod"));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "prod");

        assert_eq!(manifest.select_targets(None).len(), 2);
        assert!(manifest.select_targets(Some("missing")).is_empty());
    }
}
