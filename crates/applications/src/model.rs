//! Application, API and API version descriptions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marketsync_core::{DomainError, DomainResult, SecretRef, validation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationTag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationProperties {
    #[serde(default)]
    pub owner_user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub documentation_url: String,
    pub logo_image_url: String,
    pub publisher: String,
    #[serde(default)]
    pub tags: Vec<ApplicationTag>,
}

impl ApplicationProperties {
    pub fn validate(&self) -> DomainResult<()> {
        validation::display_name("display_name", &self.display_name)?;
        validation::display_name("publisher", &self.publisher)?;
        validation::max_len(
            "owner_user_id",
            &self.owner_user_id,
            validation::OBJECT_NAME_MAX,
        )?;
        validation::long_text("description", &self.description)?;
        validation::https_url("documentation_url", &self.documentation_url)?;
        validation::https_url("logo_image_url", &self.logo_image_url)?;
        for tag in &self.tags {
            validation::predefined("tag key", &tag.key)?;
            validation::long_text("tag value", &tag.value)?;
        }
        Ok(())
    }
}

/// Where the two master keys live in the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeys {
    pub primary: SecretRef,
    pub secondary: SecretRef,
}

impl MasterKeys {
    pub fn secret_names(&self) -> [&str; 2] {
        [&self.primary.secret_name, &self.secondary.secret_name]
    }
}

/// Freshly generated master key values.
///
/// Produced by the caller and passed in with the command so that deciding stays
/// deterministic.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKeyValues {
    pub primary: String,
    pub secondary: String,
}

impl MasterKeyValues {
    pub fn generate() -> Self {
        Self {
            primary: Uuid::new_v4().simple().to_string(),
            secondary: Uuid::new_v4().simple().to_string(),
        }
    }
}

impl core::fmt::Debug for MasterKeyValues {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("MasterKeyValues(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiType {
    Realtime,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiProperties {
    pub display_name: String,
    #[serde(rename = "type")]
    pub api_type: ApiType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub advanced_settings: Option<String>,
}

impl ApiProperties {
    pub fn validate(&self) -> DomainResult<()> {
        validation::display_name("display_name", &self.display_name)?;
        validation::long_text("description", &self.description)?;
        if let Some(settings) = &self.advanced_settings {
            validation::long_text("advanced_settings", settings)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiVersionType {
    #[serde(rename = "AzureML")]
    AzureMl,
    AzureDatabricks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEndpoint {
    pub endpoint_name: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersionProperties {
    #[serde(rename = "type")]
    pub version_type: ApiVersionType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub advanced_settings: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<VersionEndpoint>,
}

impl ApiVersionProperties {
    /// Validates the version against the API it belongs to.
    pub fn validate(&self, api_type: ApiType) -> DomainResult<()> {
        validation::long_text("description", &self.description)?;
        if let Some(settings) = &self.advanced_settings {
            validation::long_text("advanced_settings", settings)?;
        }
        if let Some(workspace) = &self.workspace_name {
            validation::object_name("workspace_name", workspace)?;
        }
        if api_type == ApiType::Pipeline && self.version_type != ApiVersionType::AzureMl {
            return Err(DomainError::validation(format!(
                "{:?} versions are not supported for Pipeline APIs",
                self.version_type
            )));
        }
        for endpoint in &self.endpoints {
            validation::display_name("endpoint_name", &endpoint.endpoint_name)?;
            if let Some(op) = &endpoint.operation_name {
                validation::display_name("operation_name", op)?;
            }
            validation::long_text("endpoint description", &endpoint.description)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersion {
    pub name: String,
    pub properties: ApiVersionProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Api {
    pub name: String,
    pub properties: ApiProperties,
    #[serde(default)]
    pub versions: std::collections::BTreeMap<String, ApiVersion>,
}

impl Api {
    pub fn version(&self, name: &str) -> Option<&ApiVersion> {
        self.versions.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> ApplicationProperties {
        ApplicationProperties {
            owner_user_id: "owner-1".into(),
            display_name: "My App".into(),
            description: "This is my application".into(),
            documentation_url: "https://docs.example.com".into(),
            logo_image_url: "https://cdn.example.com/logo.png".into(),
            publisher: "Contoso".into(),
            tags: vec![ApplicationTag {
                key: "Department".into(),
                value: "HR".into(),
            }],
        }
    }

    #[test]
    fn application_urls_must_be_https() {
        assert!(props().validate().is_ok());
        let mut p = props();
        p.logo_image_url = "http://cdn.example.com/logo.png".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn pipeline_apis_only_take_azure_ml_versions() {
        let version = ApiVersionProperties {
            version_type: ApiVersionType::AzureDatabricks,
            description: String::new(),
            advanced_settings: None,
            workspace_name: Some("ws-1".into()),
            endpoints: vec![],
        };
        assert!(version.validate(ApiType::Realtime).is_ok());
        match version.validate(ApiType::Pipeline).unwrap_err() {
            DomainError::Validation(_) => {}
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn api_type_serializes_under_type_key() {
        let api = ApiProperties {
            display_name: "sentiment".into(),
            api_type: ApiType::Realtime,
            description: String::new(),
            advanced_settings: None,
        };
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["type"], "Realtime");
    }

    #[test]
    fn generated_master_keys_are_distinct_and_hidden_from_debug() {
        let keys = MasterKeyValues::generate();
        assert_ne!(keys.primary, keys.secondary);
        assert_eq!(keys.primary.len(), 32);
        assert!(!format!("{keys:?}").contains(&keys.primary));
    }
}
