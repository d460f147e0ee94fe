use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use marketsync_core::{
    Aggregate, AggregateRoot, Decision, DecisionContext, DomainError, DomainResult,
    LifecycleStatus, PartitionKey, validation,
};
use marketsync_events::Event;

use crate::event::OfferEvent;
use crate::generator::OfferEventContentGenerator;
use crate::model::{
    OfferProperties, OfferTemplate, Parameter, Plan, PlanProperties, ProvisioningStep,
    StepDefinition,
};

/// Aggregate root: marketplace offer.
///
/// Sub-entities are keyed by their own names; `BTreeMap` keeps serialized
/// snapshots byte-stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    offer_id: PartitionKey,
    status: LifecycleStatus,
    properties: OfferProperties,
    #[serde(default)]
    plans: BTreeMap<String, Plan>,
    #[serde(default)]
    parameters: BTreeMap<String, Parameter>,
    #[serde(default)]
    provisioning_steps: BTreeMap<String, ProvisioningStep>,
}

impl Offer {
    /// A fresh draft offer with no sub-entities.
    pub fn new(offer_id: PartitionKey, properties: OfferProperties) -> Self {
        Self {
            offer_id,
            status: LifecycleStatus::Draft,
            properties,
            plans: BTreeMap::new(),
            parameters: BTreeMap::new(),
            provisioning_steps: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: LifecycleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn offer_id(&self) -> &PartitionKey {
        &self.offer_id
    }

    pub fn properties(&self) -> &OfferProperties {
        &self.properties
    }

    pub fn plan(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn provisioning_step(&self, name: &str) -> Option<&ProvisioningStep> {
        self.provisioning_steps.get(name)
    }

    pub fn provisioning_steps(&self) -> impl Iterator<Item = &ProvisioningStep> {
        self.provisioning_steps.values()
    }

    pub(crate) fn put_plan(&mut self, plan: Plan) {
        self.plans.insert(plan.plan_id.clone(), plan);
    }

    pub(crate) fn put_parameter(&mut self, parameter: Parameter) {
        self.parameters
            .insert(parameter.parameter_name.clone(), parameter);
    }

    pub(crate) fn put_step(&mut self, step: ProvisioningStep) {
        self.provisioning_steps.insert(step.name.clone(), step);
    }
}

impl AggregateRoot for Offer {
    fn partition_key(&self) -> &PartitionKey {
        &self.offer_id
    }

    fn status(&self) -> LifecycleStatus {
        self.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferCommand {
    CreateOffer {
        offer_id: PartitionKey,
        properties: OfferProperties,
    },
    UpdateOffer {
        offer_id: PartitionKey,
        properties: OfferProperties,
    },
    CreateOfferFromTemplate {
        offer_id: PartitionKey,
        template: OfferTemplate,
    },
    UpdateOfferFromTemplate {
        offer_id: PartitionKey,
        template: OfferTemplate,
    },
    PublishOffer {
        offer_id: PartitionKey,
    },
    DeleteOffer {
        offer_id: PartitionKey,
    },
    CreatePlan {
        offer_id: PartitionKey,
        plan_id: String,
        properties: PlanProperties,
    },
    UpdatePlan {
        offer_id: PartitionKey,
        plan_id: String,
        properties: PlanProperties,
    },
    DeletePlan {
        offer_id: PartitionKey,
        plan_id: String,
    },
    CreateParameter {
        offer_id: PartitionKey,
        parameter: Parameter,
    },
    UpdateParameter {
        offer_id: PartitionKey,
        parameter: Parameter,
    },
    DeleteParameter {
        offer_id: PartitionKey,
        parameter_name: String,
    },
    CreateProvisioningStep {
        offer_id: PartitionKey,
        step: StepDefinition,
    },
    UpdateProvisioningStep {
        offer_id: PartitionKey,
        step: StepDefinition,
    },
    DeleteProvisioningStep {
        offer_id: PartitionKey,
        step_name: String,
    },
}

impl Aggregate for Offer {
    type Command = OfferCommand;
    type Event = OfferEvent;

    const AGGREGATE_TYPE: &'static str = "marketplace.offer";

    fn target(command: &OfferCommand) -> &PartitionKey {
        match command {
            OfferCommand::CreateOffer { offer_id, .. }
            | OfferCommand::UpdateOffer { offer_id, .. }
            | OfferCommand::CreateOfferFromTemplate { offer_id, .. }
            | OfferCommand::UpdateOfferFromTemplate { offer_id, .. }
            | OfferCommand::PublishOffer { offer_id }
            | OfferCommand::DeleteOffer { offer_id }
            | OfferCommand::CreatePlan { offer_id, .. }
            | OfferCommand::UpdatePlan { offer_id, .. }
            | OfferCommand::DeletePlan { offer_id, .. }
            | OfferCommand::CreateParameter { offer_id, .. }
            | OfferCommand::UpdateParameter { offer_id, .. }
            | OfferCommand::DeleteParameter { offer_id, .. }
            | OfferCommand::CreateProvisioningStep { offer_id, .. }
            | OfferCommand::UpdateProvisioningStep { offer_id, .. }
            | OfferCommand::DeleteProvisioningStep { offer_id, .. } => offer_id,
        }
    }

    fn is_genesis(event: &OfferEvent) -> bool {
        matches!(
            event,
            OfferEvent::OfferCreated(_) | OfferEvent::OfferCreatedFromTemplate(_)
        )
    }

    fn apply(state: Option<Self>, event: &OfferEvent) -> DomainResult<Self> {
        // Genesis resets the partition, including over a deleted offer.
        if let OfferEvent::OfferCreated(e) | OfferEvent::OfferCreatedFromTemplate(e) = event {
            return Ok(e.offer.clone());
        }

        let mut offer = state.ok_or_else(|| {
            DomainError::invariant(format!(
                "'{}' applied to offer '{}' with no history",
                event.event_type(),
                event.partition_key()
            ))
        })?;
        if event.partition_key() != &offer.offer_id {
            return Err(DomainError::invariant(format!(
                "event for offer '{}' applied to offer '{}'",
                event.partition_key(),
                offer.offer_id
            )));
        }

        match event {
            OfferEvent::OfferCreated(_) | OfferEvent::OfferCreatedFromTemplate(_) => {} // handled above
            OfferEvent::OfferUpdatedFromTemplate(e) | OfferEvent::OfferPublished(e) => {
                offer = e.offer.clone();
            }
            OfferEvent::OfferUpdated(e) => {
                offer.properties = e.properties.clone();
            }
            OfferEvent::OfferDeleted(_) => {
                offer.status = LifecycleStatus::Deleted;
            }
            OfferEvent::PlanCreated(e) | OfferEvent::PlanUpdated(e) => {
                offer.put_plan(e.plan.clone());
            }
            OfferEvent::PlanDeleted(e) => {
                offer.plans.remove(&e.plan_id);
            }
            OfferEvent::ParameterCreated(e) | OfferEvent::ParameterUpdated(e) => {
                offer.put_parameter(e.parameter.clone());
            }
            OfferEvent::ParameterDeleted(e) => {
                offer.parameters.remove(&e.parameter_name);
            }
            OfferEvent::ProvisioningStepCreated(e) | OfferEvent::ProvisioningStepUpdated(e) => {
                offer.put_step(e.step.clone());
            }
            OfferEvent::ProvisioningStepDeleted(e) => {
                offer.provisioning_steps.remove(&e.step_name);
            }
        }
        Ok(offer)
    }

    fn handle(
        state: Option<&Self>,
        command: &OfferCommand,
        ctx: &DecisionContext,
    ) -> DomainResult<Decision<OfferEvent>> {
        match command {
            OfferCommand::CreateOffer {
                offer_id,
                properties,
            } => {
                ensure_absent(state, offer_id)?;
                properties.validate()?;
                Ok(Decision::new(OfferEventContentGenerator::create_offer(
                    offer_id, properties,
                )))
            }
            OfferCommand::UpdateOffer {
                offer_id,
                properties,
            } => {
                active(state, offer_id)?;
                properties.validate()?;
                Ok(Decision::new(OfferEventContentGenerator::update_offer(
                    offer_id, properties,
                )))
            }
            OfferCommand::CreateOfferFromTemplate { offer_id, template } => {
                ensure_template_key(offer_id, template)?;
                ensure_absent(state, offer_id)?;
                template.validate()?;
                Ok(OfferEventContentGenerator::create_offer_from_template(
                    offer_id, template, ctx,
                ))
            }
            OfferCommand::UpdateOfferFromTemplate { offer_id, template } => {
                ensure_template_key(offer_id, template)?;
                let offer = active(state, offer_id)?;
                template.validate()?;
                for step in &template.provisioning_steps {
                    if let Some(existing) = offer.provisioning_step(&step.name) {
                        ensure_same_step_type(existing, step)?;
                    }
                }
                for param in &template.parameters {
                    if let Some(existing) = offer.parameter(&param.parameter_name) {
                        ensure_same_value_type(existing, param)?;
                    }
                }
                Ok(OfferEventContentGenerator::update_offer_from_template(
                    offer, template, ctx,
                ))
            }
            OfferCommand::PublishOffer { offer_id } => {
                let offer = active(state, offer_id)?;
                if offer.plans.is_empty() {
                    return Err(DomainError::validation(
                        "an offer needs at least one plan to be published",
                    ));
                }
                Ok(Decision::new(OfferEventContentGenerator::publish_offer(offer)))
            }
            OfferCommand::DeleteOffer { offer_id } => {
                let offer = active(state, offer_id)?;
                let mut decision = Decision::new(OfferEventContentGenerator::delete_offer(offer_id));
                for step in offer.provisioning_steps() {
                    if let Some(secret) = step.properties.auth_secret() {
                        decision = decision.with_secret_delete(secret.secret_name.clone());
                    }
                }
                Ok(decision)
            }
            OfferCommand::CreatePlan {
                offer_id,
                plan_id,
                properties,
            } => {
                let offer = active(state, offer_id)?;
                validation::object_name("plan_id", plan_id)?;
                if offer.plan(plan_id).is_some() {
                    return Err(DomainError::conflict(format!(
                        "plan '{plan_id}' already exists in offer '{offer_id}'"
                    )));
                }
                properties.validate()?;
                ensure_steps_exist(offer, properties)?;
                Ok(Decision::new(OfferEventContentGenerator::create_plan(
                    offer_id, plan_id, properties,
                )))
            }
            OfferCommand::UpdatePlan {
                offer_id,
                plan_id,
                properties,
            } => {
                let offer = active(state, offer_id)?;
                existing(offer.plan(plan_id), "plan", plan_id)?;
                properties.validate()?;
                ensure_steps_exist(offer, properties)?;
                Ok(Decision::new(OfferEventContentGenerator::update_plan(
                    offer_id, plan_id, properties,
                )))
            }
            OfferCommand::DeletePlan { offer_id, plan_id } => {
                let offer = active(state, offer_id)?;
                existing(offer.plan(plan_id), "plan", plan_id)?;
                Ok(Decision::new(OfferEventContentGenerator::delete_plan(
                    offer_id, plan_id,
                )))
            }
            OfferCommand::CreateParameter {
                offer_id,
                parameter,
            } => {
                let offer = active(state, offer_id)?;
                parameter.validate()?;
                if offer.parameter(&parameter.parameter_name).is_some() {
                    return Err(DomainError::conflict(format!(
                        "parameter '{}' already exists in offer '{offer_id}'",
                        parameter.parameter_name
                    )));
                }
                Ok(Decision::new(OfferEventContentGenerator::create_parameter(
                    offer_id, parameter,
                )))
            }
            OfferCommand::UpdateParameter {
                offer_id,
                parameter,
            } => {
                let offer = active(state, offer_id)?;
                let current = existing(
                    offer.parameter(&parameter.parameter_name),
                    "parameter",
                    &parameter.parameter_name,
                )?;
                parameter.validate()?;
                ensure_same_value_type(current, parameter)?;
                Ok(Decision::new(OfferEventContentGenerator::update_parameter(
                    offer_id, parameter,
                )))
            }
            OfferCommand::DeleteParameter {
                offer_id,
                parameter_name,
            } => {
                let offer = active(state, offer_id)?;
                existing(offer.parameter(parameter_name), "parameter", parameter_name)?;
                Ok(Decision::new(OfferEventContentGenerator::delete_parameter(
                    offer_id,
                    parameter_name,
                )))
            }
            OfferCommand::CreateProvisioningStep { offer_id, step } => {
                let offer = active(state, offer_id)?;
                validation::object_name("step name", &step.name)?;
                if offer.provisioning_step(&step.name).is_some() {
                    return Err(DomainError::conflict(format!(
                        "provisioning step '{}' already exists in offer '{offer_id}'",
                        step.name
                    )));
                }
                step.properties.validate()?;
                Ok(OfferEventContentGenerator::create_provisioning_step(
                    offer_id, step, ctx,
                ))
            }
            OfferCommand::UpdateProvisioningStep { offer_id, step } => {
                let offer = active(state, offer_id)?;
                let current = existing(
                    offer.provisioning_step(&step.name),
                    "provisioning step",
                    &step.name,
                )?;
                step.properties.validate()?;
                ensure_same_step_type(current, step)?;
                Ok(OfferEventContentGenerator::update_provisioning_step(
                    offer_id, current, step, ctx,
                ))
            }
            OfferCommand::DeleteProvisioningStep {
                offer_id,
                step_name,
            } => {
                let offer = active(state, offer_id)?;
                let current = existing(
                    offer.provisioning_step(step_name),
                    "provisioning step",
                    step_name,
                )?;
                ensure_step_unreferenced(offer, step_name)?;
                Ok(OfferEventContentGenerator::delete_provisioning_step(
                    offer_id, current,
                ))
            }
        }
    }
}

fn active<'a>(state: Option<&'a Offer>, offer_id: &PartitionKey) -> DomainResult<&'a Offer> {
    match state {
        Some(offer) if offer.is_active() => Ok(offer),
        _ => Err(DomainError::not_found(format!("offer '{offer_id}'"))),
    }
}

fn ensure_absent(state: Option<&Offer>, offer_id: &PartitionKey) -> DomainResult<()> {
    match state {
        Some(offer) if offer.is_active() => Err(DomainError::conflict(format!(
            "offer '{offer_id}' already exists"
        ))),
        _ => Ok(()),
    }
}

fn existing<'a, T>(found: Option<&'a T>, what: &str, name: &str) -> DomainResult<&'a T> {
    found.ok_or_else(|| DomainError::not_found(format!("{what} '{name}'")))
}

fn ensure_template_key(offer_id: &PartitionKey, template: &OfferTemplate) -> DomainResult<()> {
    if template.offer_id != offer_id.as_str() {
        return Err(DomainError::conflict(format!(
            "offer id '{}' in template does not match '{offer_id}'",
            template.offer_id
        )));
    }
    Ok(())
}

fn ensure_same_step_type(current: &ProvisioningStep, requested: &StepDefinition) -> DomainResult<()> {
    if current.step_type() != requested.properties.step_type() {
        return Err(DomainError::validation(format!(
            "provisioning step '{}' type cannot change from {:?} to {:?}",
            current.name,
            current.step_type(),
            requested.properties.step_type()
        )));
    }
    Ok(())
}

fn ensure_same_value_type(current: &Parameter, requested: &Parameter) -> DomainResult<()> {
    if current.value_type != requested.value_type {
        return Err(DomainError::validation(format!(
            "parameter '{}' value type cannot change from {:?} to {:?}",
            current.parameter_name, current.value_type, requested.value_type
        )));
    }
    Ok(())
}

fn ensure_steps_exist(offer: &Offer, properties: &PlanProperties) -> DomainResult<()> {
    for step in properties.referenced_steps() {
        if offer.provisioning_step(step).is_none() {
            return Err(DomainError::validation(format!(
                "provisioning step '{step}' does not exist in offer '{}'",
                offer.offer_id
            )));
        }
    }
    Ok(())
}

fn ensure_step_unreferenced(offer: &Offer, step_name: &str) -> DomainResult<()> {
    if let Some(plan) = offer
        .plans()
        .find(|plan| plan.properties.referenced_steps().any(|s| s == step_name))
    {
        return Err(DomainError::conflict(format!(
            "provisioning step '{step_name}' is still used by plan '{}'",
            plan.plan_id
        )));
    }
    Ok(())
}
