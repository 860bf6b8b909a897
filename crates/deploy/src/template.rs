//! Infrastructure template deployment and dry-run evaluation.

use std::path::Path;

use anyhow::{Context, Result, bail};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::time::Instant;

use crate::client::{AzureClient, RESOURCES_API_VERSION};
use crate::manifest::DeployTemplate;
use crate::poll::{self, Poll};

/// Loaded template and parameters, ready for submission.
#[derive(Debug)]
pub(crate) struct ParsedTemplate {
    pub template: Value,
    /// Parameter name to `{"value": ...}` object, per the deployment API.
    pub parameters: Map<String, Value>,
}

/// Read the template and parameter documents from the application directory.
///
/// The parameter file must hold a top-level `parameters` object whose entries
/// are objects with a `value` field; entries of any other shape are skipped
/// with a warning instead of failing the whole deployment.
pub(crate) fn parse_template_files(
    app_dir: &Path,
    template: &DeployTemplate,
) -> Result<ParsedTemplate> {
    let template_path = app_dir.join(&template.template_file);
    let content = std::fs::read_to_string(&template_path)
        .with_context(|| format!("failed to read template {}", template_path.display()))?;
    let template_json: Value = serde_json::from_str(&content)
        .with_context(|| format!("template {} is not valid JSON", template_path.display()))?;

    let parameter_path = app_dir.join(&template.parameter_file);
    let content = std::fs::read_to_string(&parameter_path)
        .with_context(|| format!("failed to read parameter file {}", parameter_path.display()))?;
    let parameter_json: Value = serde_json::from_str(&content).with_context(|| {
        format!("parameter file {} is not valid JSON", parameter_path.display())
    })?;

    let Some(raw_parameters) = parameter_json.get("parameters").and_then(Value::as_object) else {
        bail!(
            "parameter file {} has no top-level parameters object",
            parameter_path.display()
        );
    };

    let mut parameters = Map::new();
    for (name, entry) in raw_parameters {
        let Some(entry) = entry.as_object() else {
            tracing::warn!(parameter = %name, "parameter entry is not an object, skipped");
            continue;
        };
        let Some(value) = entry.get("value") else {
            tracing::warn!(parameter = %name, "parameter entry has no value field, skipped");
            continue;
        };
        parameters.insert(name.clone(), json!({ "value": value }));
    }

    Ok(ParsedTemplate {
        template: template_json,
        parameters,
    })
}

fn deployment_path(client: &AzureClient, resource_group: &str, name: &str, suffix: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Resources/deployments/{}{}",
        client.subscription_id(),
        resource_group,
        name,
        suffix
    )
}

fn submission_body(parsed: &ParsedTemplate) -> Value {
    // Incremental mode only: resources absent from the template are left
    // alone, never deleted.
    json!({
        "properties": {
            "mode": "Incremental",
            "template": parsed.template,
            "parameters": parsed.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct DeploymentDocument {
    #[serde(default)]
    properties: Value,
}

/// Submit an incremental deployment and wait for its terminal state.
pub async fn deploy(
    client: &AzureClient,
    resource_group: &str,
    app_dir: &Path,
    template: &DeployTemplate,
    deadline: Instant,
) -> Result<()> {
    let parsed = parse_template_files(app_dir, template)?;
    let path = deployment_path(client, resource_group, &template.deployment_name, "");
    client
        .request(Method::PUT, &path, RESOURCES_API_VERSION, Some(&submission_body(&parsed)))
        .await
        .with_context(|| format!("failed to submit deployment {}", template.deployment_name))?;

    let properties = poll::wait_for(
        "template deployment",
        client.poll_interval(),
        deadline,
        || {
            let path = path.clone();
            async move {
                let doc: DeploymentDocument = client
                    .request(Method::GET, &path, RESOURCES_API_VERSION, None)
                    .await?
                    .json()
                    .await
                    .context("deployment document is not the expected JSON")?;
                let state = doc
                    .properties
                    .get("provisioningState")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match state {
                    "Succeeded" => Ok(Poll::Ready(doc.properties)),
                    "Failed" | "Canceled" => {
                        let error = doc
                            .properties
                            .get("error")
                            .cloned()
                            .unwrap_or(Value::Null);
                        bail!("deployment reached state {state}: {error}")
                    }
                    _ => Ok(Poll::Pending),
                }
            }
        },
    )
    .await?;

    tracing::info!(
        deployment = %template.deployment_name,
        properties = %properties,
        "Template deployment finished"
    );
    Ok(())
}

/// Result envelope of a what-if evaluation.
#[derive(Debug, Default, Deserialize)]
struct WhatIfResult {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    properties: Option<WhatIfProperties>,
}

/// Change set computed by a what-if evaluation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfProperties {
    #[serde(default)]
    pub changes: Vec<WhatIfChange>,
    #[serde(default)]
    pub potential_changes: Vec<WhatIfChange>,
}

/// Predicted change to one resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfChange {
    pub resource_id: String,
    pub change_type: ChangeType,
    /// Property-level differences; populated for modifications.
    #[serde(default)]
    pub delta: Vec<WhatIfPropertyChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ChangeType {
    Create,
    Delete,
    Modify,
    Deploy,
    NoChange,
    Ignore,
    Unsupported,
}

/// One property-level difference; composite and array changes nest children.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfPropertyChange {
    pub path: String,
    pub property_change_type: PropertyChangeType,
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
    #[serde(default)]
    pub children: Vec<WhatIfPropertyChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PropertyChangeType {
    Create,
    Delete,
    Modify,
    Array,
    NoEffect,
}

/// Evaluate the template without applying it, returning the change set a real
/// deployment would produce. An error payload in the evaluation result is
/// surfaced as the error.
pub async fn what_if(
    client: &AzureClient,
    resource_group: &str,
    app_dir: &Path,
    template: &DeployTemplate,
    deadline: Instant,
) -> Result<WhatIfProperties> {
    let parsed = parse_template_files(app_dir, template)?;
    let path = deployment_path(client, resource_group, &template.deployment_name, "/whatIf");
    let response = client
        .request(Method::POST, &path, RESOURCES_API_VERSION, Some(&submission_body(&parsed)))
        .await
        .with_context(|| {
            format!("failed to submit what-if for deployment {}", template.deployment_name)
        })?;
    let response = client
        .finish_operation("what-if evaluation", response, deadline)
        .await?;

    let result: WhatIfResult = response
        .json()
        .await
        .context("what-if result is not the expected JSON")?;
    if let Some(error) = result.error {
        bail!("what-if evaluation reported an error: {error}");
    }
    Ok(result.properties.unwrap_or_default())
}
