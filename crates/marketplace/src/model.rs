//! Offer sub-entities and the request shapes they are built from.

use serde::{Deserialize, Serialize};

use marketsync_core::{DomainError, DomainResult, SecretRef, validation};

/// Default webhook timeout when the request leaves it out.
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u32 = 30;
/// Upper bound for script and webhook timeouts.
pub const MAX_STEP_TIMEOUT_SECS: u32 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferProperties {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_manual_activation: bool,
}

impl OfferProperties {
    pub fn validate(&self) -> DomainResult<()> {
        validation::display_name("display_name", &self.display_name)?;
        validation::long_text("description", &self.description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanMode {
    #[serde(rename = "SaaS")]
    Saas,
    #[serde(rename = "IaaS")]
    Iaas,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProperties {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub mode: PlanMode,
    /// Provisioning step names run on each subscription lifecycle transition.
    #[serde(default)]
    pub on_subscribe: Vec<String>,
    #[serde(default)]
    pub on_update: Vec<String>,
    #[serde(default)]
    pub on_suspend: Vec<String>,
    #[serde(default)]
    pub on_delete: Vec<String>,
    #[serde(default)]
    pub on_purge: Vec<String>,
    /// Published application backing a SaaS plan.
    #[serde(default)]
    pub application_name: Option<String>,
}

impl PlanProperties {
    pub fn validate(&self) -> DomainResult<()> {
        validation::display_name("display_name", &self.display_name)?;
        validation::long_text("description", &self.description)?;
        if let Some(app) = &self.application_name {
            validation::object_name("application_name", app)?;
        }
        for step in self.referenced_steps() {
            validation::object_name("provisioning step reference", step)?;
        }
        Ok(())
    }

    /// Every provisioning step name any lifecycle list refers to.
    pub fn referenced_steps(&self) -> impl Iterator<Item = &str> {
        self.on_subscribe
            .iter()
            .chain(&self.on_update)
            .chain(&self.on_suspend)
            .chain(&self.on_delete)
            .chain(&self.on_purge)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub properties: PlanProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterValueType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub parameter_name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub value_type: ParameterValueType,
    #[serde(default)]
    pub from_list: bool,
    #[serde(default)]
    pub value_list: Vec<String>,
    #[serde(default)]
    pub maximum: Option<i64>,
    #[serde(default)]
    pub minimum: Option<i64>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_user_input: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl Parameter {
    pub fn validate(&self) -> DomainResult<()> {
        validation::object_name("parameter_name", &self.parameter_name)?;
        validation::display_name("display_name", &self.display_name)?;
        validation::long_text("description", &self.description)?;

        if self.from_list && self.value_list.is_empty() {
            return Err(DomainError::validation(
                "value_list cannot be empty when from_list is set",
            ));
        }
        for value in &self.value_list {
            validation::predefined("value_list entry", value)?;
        }

        match (self.minimum, self.maximum) {
            (Some(_), _) | (_, Some(_)) if self.value_type != ParameterValueType::Number => {
                return Err(DomainError::validation(
                    "minimum/maximum only apply to Number parameters",
                ));
            }
            (Some(min), Some(max)) if min > max => {
                return Err(DomainError::validation(format!(
                    "minimum ({min}) is greater than maximum ({max})"
                )));
            }
            _ => {}
        }

        if let Some(default) = &self.default_value {
            validation::long_text("default_value", default)?;
            if self.from_list && !self.value_list.contains(default) {
                return Err(DomainError::validation(
                    "default_value must be one of value_list",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    #[serde(rename = "ARMTemplate")]
    ArmTemplate,
    Script,
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookAuthType {
    None,
    ApiKey,
}

/// Stored step configuration. Webhook credentials are only referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepProperties {
    #[serde(rename = "ARMTemplate")]
    ArmTemplate {
        template_url: String,
        is_run_in_complete_mode: bool,
    },
    Script {
        script_package_url: String,
        entry_script_file_name: String,
        timeout_in_seconds: u32,
        #[serde(default)]
        input_arguments: Vec<String>,
    },
    Webhook {
        webhook_url: String,
        auth_type: WebhookAuthType,
        #[serde(default)]
        auth_key: Option<String>,
        #[serde(default)]
        auth_value: Option<SecretRef>,
        timeout_in_seconds: u32,
        #[serde(default)]
        input_parameter_names: Vec<String>,
    },
}

impl StepProperties {
    pub fn step_type(&self) -> StepType {
        match self {
            StepProperties::ArmTemplate { .. } => StepType::ArmTemplate,
            StepProperties::Script { .. } => StepType::Script,
            StepProperties::Webhook { .. } => StepType::Webhook,
        }
    }

    pub fn auth_secret(&self) -> Option<&SecretRef> {
        match self {
            StepProperties::Webhook { auth_value, .. } => auth_value.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStep {
    pub name: String,
    pub properties: StepProperties,
}

impl ProvisioningStep {
    pub fn step_type(&self) -> StepType {
        self.properties.step_type()
    }
}

/// Step configuration as submitted, with the webhook credential in plain text.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepRequest {
    #[serde(rename = "ARMTemplate")]
    ArmTemplate {
        template_url: String,
        #[serde(default)]
        is_run_in_complete_mode: bool,
    },
    Script {
        script_package_url: String,
        entry_script_file_name: String,
        timeout_in_seconds: u32,
        #[serde(default)]
        input_arguments: Vec<String>,
    },
    Webhook {
        webhook_url: String,
        auth_type: WebhookAuthType,
        #[serde(default)]
        auth_key: Option<String>,
        #[serde(default)]
        auth_value: Option<String>,
        #[serde(default)]
        timeout_in_seconds: Option<u32>,
        #[serde(default)]
        input_parameter_names: Vec<String>,
    },
}

impl StepRequest {
    pub fn step_type(&self) -> StepType {
        match self {
            StepRequest::ArmTemplate { .. } => StepType::ArmTemplate,
            StepRequest::Script { .. } => StepType::Script,
            StepRequest::Webhook { .. } => StepType::Webhook,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            StepRequest::ArmTemplate { template_url, .. } => {
                validation::https_url("template_url", template_url)
            }
            StepRequest::Script {
                script_package_url,
                entry_script_file_name,
                timeout_in_seconds,
                input_arguments,
            } => {
                validation::https_url("script_package_url", script_package_url)?;
                validation::display_name("entry_script_file_name", entry_script_file_name)?;
                validation::in_range(
                    "timeout_in_seconds",
                    *timeout_in_seconds,
                    1,
                    MAX_STEP_TIMEOUT_SECS,
                )?;
                for arg in input_arguments {
                    validation::object_name("input_arguments entry", arg)?;
                }
                Ok(())
            }
            StepRequest::Webhook {
                webhook_url,
                auth_type,
                auth_key,
                auth_value,
                timeout_in_seconds,
                input_parameter_names,
            } => {
                validation::https_url("webhook_url", webhook_url)?;
                if *auth_type == WebhookAuthType::ApiKey {
                    let key = auth_key.as_deref().unwrap_or_default();
                    validation::predefined("auth_key", key)?;
                    let value = auth_value.as_deref().unwrap_or_default();
                    validation::required("auth_value", value)?;
                    validation::long_text("auth_value", value)?;
                }
                validation::in_range(
                    "timeout_in_seconds",
                    timeout_in_seconds.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS),
                    1,
                    MAX_STEP_TIMEOUT_SECS,
                )?;
                for name in input_parameter_names {
                    validation::object_name("input_parameter_names entry", name)?;
                }
                Ok(())
            }
        }
    }
}

// Keeps webhook credentials out of logs.
impl core::fmt::Debug for StepRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StepRequest::ArmTemplate { template_url, .. } => f
                .debug_struct("ArmTemplate")
                .field("template_url", template_url)
                .finish_non_exhaustive(),
            StepRequest::Script {
                script_package_url, ..
            } => f
                .debug_struct("Script")
                .field("script_package_url", script_package_url)
                .finish_non_exhaustive(),
            StepRequest::Webhook {
                webhook_url,
                auth_type,
                ..
            } => f
                .debug_struct("Webhook")
                .field("webhook_url", webhook_url)
                .field("auth_type", auth_type)
                .finish_non_exhaustive(),
        }
    }
}

/// Named step request, as it appears in commands and offer templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub properties: StepRequest,
}

/// A complete offer document used to create or replace an offer in one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTemplate {
    pub offer_id: String,
    pub properties: OfferProperties,
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub provisioning_steps: Vec<StepDefinition>,
}

impl OfferTemplate {
    pub fn validate(&self) -> DomainResult<()> {
        self.properties.validate()?;

        let mut seen = std::collections::BTreeSet::new();
        for plan in &self.plans {
            validation::object_name("plan_id", &plan.plan_id)?;
            plan.properties.validate()?;
            if !seen.insert(("plan", plan.plan_id.as_str())) {
                return Err(DomainError::validation(format!(
                    "duplicate plan '{}' in template",
                    plan.plan_id
                )));
            }
        }
        for param in &self.parameters {
            param.validate()?;
            if !seen.insert(("parameter", param.parameter_name.as_str())) {
                return Err(DomainError::validation(format!(
                    "duplicate parameter '{}' in template",
                    param.parameter_name
                )));
            }
        }
        for step in &self.provisioning_steps {
            validation::object_name("step name", &step.name)?;
            step.properties.validate()?;
            if !seen.insert(("step", step.name.as_str())) {
                return Err(DomainError::validation(format!(
                    "duplicate provisioning step '{}' in template",
                    step.name
                )));
            }
        }

        for plan in &self.plans {
            for step in plan.properties.referenced_steps() {
                if !self.provisioning_steps.iter().any(|s| s.name == step) {
                    return Err(DomainError::validation(format!(
                        "plan '{}' references unknown provisioning step '{step}'",
                        plan.plan_id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_param() -> Parameter {
        Parameter {
            parameter_name: "vm_count".into(),
            display_name: "VM count".into(),
            description: String::new(),
            value_type: ParameterValueType::Number,
            from_list: false,
            value_list: vec![],
            maximum: Some(10),
            minimum: Some(1),
            is_required: true,
            is_user_input: true,
            default_value: None,
        }
    }

    fn webhook(auth_value: Option<&str>) -> StepRequest {
        StepRequest::Webhook {
            webhook_url: "https://hooks.example.com/provision".into(),
            auth_type: WebhookAuthType::ApiKey,
            auth_key: Some("x-api-key".into()),
            auth_value: auth_value.map(str::to_string),
            timeout_in_seconds: None,
            input_parameter_names: vec!["vm_count".into()],
        }
    }

    #[test]
    fn parameter_rejects_inverted_range() {
        let mut p = number_param();
        p.minimum = Some(20);
        match p.validate().unwrap_err() {
            DomainError::Validation(_) => {}
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn parameter_rejects_range_on_strings() {
        let mut p = number_param();
        p.value_type = ParameterValueType::String;
        assert!(p.validate().is_err());
    }

    #[test]
    fn list_parameter_requires_values_and_member_default() {
        let mut p = number_param();
        p.value_type = ParameterValueType::String;
        p.minimum = None;
        p.maximum = None;
        p.from_list = true;
        assert!(p.validate().is_err());

        p.value_list = vec!["small".into(), "large".into()];
        p.default_value = Some("medium".into());
        assert!(p.validate().is_err());

        p.default_value = Some("small".into());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn api_key_webhook_requires_auth_value() {
        assert!(webhook(Some("s3cret")).validate().is_ok());
        assert!(webhook(None).validate().is_err());
    }

    #[test]
    fn step_urls_must_be_https() {
        let step = StepRequest::ArmTemplate {
            template_url: "http://insecure.example.com/t.json".into(),
            is_run_in_complete_mode: false,
        };
        assert!(step.validate().is_err());
    }

    #[test]
    fn step_request_debug_hides_credentials() {
        let rendered = format!("{:?}", webhook(Some("s3cret")));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn step_properties_serialize_with_type_tag() {
        let props = StepProperties::ArmTemplate {
            template_url: "https://example.com/t.json".into(),
            is_run_in_complete_mode: true,
        };
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["type"], "ARMTemplate");
        assert_eq!(props.step_type(), StepType::ArmTemplate);
    }

    #[test]
    fn template_rejects_unknown_step_reference() {
        let template = OfferTemplate {
            offer_id: "foo".into(),
            properties: OfferProperties {
                display_name: "Foo".into(),
                description: String::new(),
                is_manual_activation: false,
            },
            plans: vec![Plan {
                plan_id: "basic".into(),
                properties: PlanProperties {
                    display_name: "Basic".into(),
                    description: String::new(),
                    mode: PlanMode::Iaas,
                    on_subscribe: vec!["deploy".into()],
                    on_update: vec![],
                    on_suspend: vec![],
                    on_delete: vec![],
                    on_purge: vec![],
                    application_name: None,
                },
            }],
            parameters: vec![],
            provisioning_steps: vec![],
        };
        assert!(template.validate().is_err());
    }
}
