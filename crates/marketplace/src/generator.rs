//! Builds full-state offer events from validated requests.
//!
//! Every function here is pure: the result depends only on its arguments.
//! Webhook credentials are swapped for a [`SecretRef`] and returned as a pending
//! [`SecretWrite`] so they never reach event content.

use marketsync_core::secret::WEBHOOK_AUTH_PREFIX;
use marketsync_core::{
    AggregateRoot, Decision, DecisionContext, LifecycleStatus, PartitionKey, SecretRef, SecretWrite,
};

use crate::event::{
    OfferDeleted, OfferEvent, OfferPropertiesUpdated, OfferReplaced, ParameterDeleted,
    ParameterWritten, PlanDeleted, PlanWritten, StepDeleted, StepWritten,
};
use crate::model::{
    DEFAULT_WEBHOOK_TIMEOUT_SECS, OfferProperties, OfferTemplate, Parameter, Plan, PlanProperties,
    ProvisioningStep, StepDefinition, StepProperties, StepRequest,
};
use crate::offer::Offer;

#[derive(Debug, Default, Clone, Copy)]
pub struct OfferEventContentGenerator;

impl OfferEventContentGenerator {
    pub fn create_offer(offer_id: &PartitionKey, properties: &OfferProperties) -> OfferEvent {
        OfferEvent::OfferCreated(OfferReplaced {
            offer: Offer::new(offer_id.clone(), properties.clone()),
        })
    }

    pub fn update_offer(offer_id: &PartitionKey, properties: &OfferProperties) -> OfferEvent {
        OfferEvent::OfferUpdated(OfferPropertiesUpdated {
            offer_id: offer_id.clone(),
            properties: properties.clone(),
        })
    }

    pub fn create_offer_from_template(
        offer_id: &PartitionKey,
        template: &OfferTemplate,
        ctx: &DecisionContext,
    ) -> Decision<OfferEvent> {
        let (offer, secrets) = Self::offer_from_template(offer_id, template, LifecycleStatus::Draft, ctx);
        Self::with_secrets(OfferEvent::OfferCreatedFromTemplate(OfferReplaced { offer }), secrets)
    }

    /// Replace an existing offer wholesale, keeping its lifecycle status.
    pub fn update_offer_from_template(
        current: &Offer,
        template: &OfferTemplate,
        ctx: &DecisionContext,
    ) -> Decision<OfferEvent> {
        let (offer, secrets) =
            Self::offer_from_template(current.offer_id(), template, current.status(), ctx);

        let mut decision = Self::with_secrets(
            OfferEvent::OfferUpdatedFromTemplate(OfferReplaced {
                offer: offer.clone(),
            }),
            secrets,
        );
        // Secrets of replaced steps are no longer referenced by current state.
        for old in current.provisioning_steps() {
            if let Some(secret) = old.properties.auth_secret() {
                let still_used = offer
                    .provisioning_steps()
                    .any(|s| s.properties.auth_secret() == Some(secret));
                if !still_used {
                    decision = decision.with_secret_delete(secret.secret_name.clone());
                }
            }
        }
        decision
    }

    /// The offer as it looks once published.
    pub fn publish_offer(current: &Offer) -> OfferEvent {
        OfferEvent::OfferPublished(OfferReplaced {
            offer: current.clone().with_status(LifecycleStatus::Published),
        })
    }

    pub fn delete_offer(offer_id: &PartitionKey) -> OfferEvent {
        OfferEvent::OfferDeleted(OfferDeleted {
            offer_id: offer_id.clone(),
        })
    }

    pub fn create_plan(offer_id: &PartitionKey, plan_id: &str, properties: &PlanProperties) -> OfferEvent {
        OfferEvent::PlanCreated(Self::plan(offer_id, plan_id, properties))
    }

    pub fn update_plan(offer_id: &PartitionKey, plan_id: &str, properties: &PlanProperties) -> OfferEvent {
        OfferEvent::PlanUpdated(Self::plan(offer_id, plan_id, properties))
    }

    pub fn delete_plan(offer_id: &PartitionKey, plan_id: &str) -> OfferEvent {
        OfferEvent::PlanDeleted(PlanDeleted {
            offer_id: offer_id.clone(),
            plan_id: plan_id.to_string(),
        })
    }

    pub fn create_parameter(offer_id: &PartitionKey, parameter: &Parameter) -> OfferEvent {
        OfferEvent::ParameterCreated(ParameterWritten {
            offer_id: offer_id.clone(),
            parameter: parameter.clone(),
        })
    }

    pub fn update_parameter(offer_id: &PartitionKey, parameter: &Parameter) -> OfferEvent {
        OfferEvent::ParameterUpdated(ParameterWritten {
            offer_id: offer_id.clone(),
            parameter: parameter.clone(),
        })
    }

    pub fn delete_parameter(offer_id: &PartitionKey, parameter_name: &str) -> OfferEvent {
        OfferEvent::ParameterDeleted(ParameterDeleted {
            offer_id: offer_id.clone(),
            parameter_name: parameter_name.to_string(),
        })
    }

    pub fn create_provisioning_step(
        offer_id: &PartitionKey,
        definition: &StepDefinition,
        ctx: &DecisionContext,
    ) -> Decision<OfferEvent> {
        let (step, secret) = Self::materialize_step(definition, ctx);
        Self::with_secrets(
            OfferEvent::ProvisioningStepCreated(StepWritten {
                offer_id: offer_id.clone(),
                step,
            }),
            secret.into_iter().collect(),
        )
    }

    pub fn update_provisioning_step(
        offer_id: &PartitionKey,
        previous: &ProvisioningStep,
        definition: &StepDefinition,
        ctx: &DecisionContext,
    ) -> Decision<OfferEvent> {
        let (step, secret) = Self::materialize_step(definition, ctx);
        let mut decision = Self::with_secrets(
            OfferEvent::ProvisioningStepUpdated(StepWritten {
                offer_id: offer_id.clone(),
                step,
            }),
            secret.into_iter().collect(),
        );
        if let Some(old) = previous.properties.auth_secret() {
            decision = decision.with_secret_delete(old.secret_name.clone());
        }
        decision
    }

    pub fn delete_provisioning_step(
        offer_id: &PartitionKey,
        previous: &ProvisioningStep,
    ) -> Decision<OfferEvent> {
        let mut decision = Decision::new(OfferEvent::ProvisioningStepDeleted(StepDeleted {
            offer_id: offer_id.clone(),
            step_name: previous.name.clone(),
        }));
        if let Some(old) = previous.properties.auth_secret() {
            decision = decision.with_secret_delete(old.secret_name.clone());
        }
        decision
    }

    fn plan(offer_id: &PartitionKey, plan_id: &str, properties: &PlanProperties) -> PlanWritten {
        PlanWritten {
            offer_id: offer_id.clone(),
            plan: Plan {
                plan_id: plan_id.to_string(),
                properties: properties.clone(),
            },
        }
    }

    fn offer_from_template(
        offer_id: &PartitionKey,
        template: &OfferTemplate,
        status: LifecycleStatus,
        ctx: &DecisionContext,
    ) -> (Offer, Vec<SecretWrite>) {
        let mut offer = Offer::new(offer_id.clone(), template.properties.clone()).with_status(status);
        let mut secrets = Vec::new();

        for plan in &template.plans {
            offer.put_plan(plan.clone());
        }
        for param in &template.parameters {
            offer.put_parameter(param.clone());
        }
        for definition in &template.provisioning_steps {
            let (step, secret) = Self::materialize_step(definition, ctx);
            secrets.extend(secret);
            offer.put_step(step);
        }
        (offer, secrets)
    }

    fn materialize_step(
        definition: &StepDefinition,
        ctx: &DecisionContext,
    ) -> (ProvisioningStep, Option<SecretWrite>) {
        let mut secret = None;
        let properties = match &definition.properties {
            StepRequest::ArmTemplate {
                template_url,
                is_run_in_complete_mode,
            } => StepProperties::ArmTemplate {
                template_url: template_url.clone(),
                is_run_in_complete_mode: *is_run_in_complete_mode,
            },
            StepRequest::Script {
                script_package_url,
                entry_script_file_name,
                timeout_in_seconds,
                input_arguments,
            } => StepProperties::Script {
                script_package_url: script_package_url.clone(),
                entry_script_file_name: entry_script_file_name.clone(),
                timeout_in_seconds: *timeout_in_seconds,
                input_arguments: input_arguments.clone(),
            },
            StepRequest::Webhook {
                webhook_url,
                auth_type,
                auth_key,
                auth_value,
                timeout_in_seconds,
                input_parameter_names,
            } => {
                let reference = auth_value.as_ref().map(|value| {
                    let reference =
                        SecretRef::for_event(WEBHOOK_AUTH_PREFIX, ctx.event_id, &definition.name);
                    secret = Some(SecretWrite::new(reference.secret_name.clone(), value.clone()));
                    reference
                });
                StepProperties::Webhook {
                    webhook_url: webhook_url.clone(),
                    auth_type: *auth_type,
                    auth_key: auth_key.clone(),
                    auth_value: reference,
                    timeout_in_seconds: timeout_in_seconds.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS),
                    input_parameter_names: input_parameter_names.clone(),
                }
            }
        };
        (
            ProvisioningStep {
                name: definition.name.clone(),
                properties,
            },
            secret,
        )
    }

    fn with_secrets(event: OfferEvent, secrets: Vec<SecretWrite>) -> Decision<OfferEvent> {
        secrets
            .into_iter()
            .fold(Decision::new(event), Decision::with_secret)
    }
}
