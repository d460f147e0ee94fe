//! Offer events. Every variant carries the complete resulting state of the
//! sub-entity it touches.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use marketsync_core::PartitionKey;
use marketsync_events::{CodecError, DecoderTable, Event, EventCodec, encode_content};

use crate::model::{OfferProperties, Parameter, Plan, ProvisioningStep};
use crate::offer::Offer;

pub const OFFER_CREATED: &str = "marketplace.offer.created";
pub const OFFER_CREATED_FROM_TEMPLATE: &str = "marketplace.offer.created_from_template";
pub const OFFER_UPDATED: &str = "marketplace.offer.updated";
pub const OFFER_UPDATED_FROM_TEMPLATE: &str = "marketplace.offer.updated_from_template";
pub const OFFER_PUBLISHED: &str = "marketplace.offer.published";
pub const OFFER_DELETED: &str = "marketplace.offer.deleted";
pub const PLAN_CREATED: &str = "marketplace.plan.created";
pub const PLAN_UPDATED: &str = "marketplace.plan.updated";
pub const PLAN_DELETED: &str = "marketplace.plan.deleted";
pub const PARAMETER_CREATED: &str = "marketplace.parameter.created";
pub const PARAMETER_UPDATED: &str = "marketplace.parameter.updated";
pub const PARAMETER_DELETED: &str = "marketplace.parameter.deleted";
pub const STEP_CREATED: &str = "marketplace.provisioning_step.created";
pub const STEP_UPDATED: &str = "marketplace.provisioning_step.updated";
pub const STEP_DELETED: &str = "marketplace.provisioning_step.deleted";

/// Content of events that replace the whole offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferReplaced {
    pub offer: Offer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPropertiesUpdated {
    pub offer_id: PartitionKey,
    pub properties: OfferProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDeleted {
    pub offer_id: PartitionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanWritten {
    pub offer_id: PartitionKey,
    pub plan: Plan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDeleted {
    pub offer_id: PartitionKey,
    pub plan_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterWritten {
    pub offer_id: PartitionKey,
    pub parameter: Parameter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDeleted {
    pub offer_id: PartitionKey,
    pub parameter_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepWritten {
    pub offer_id: PartitionKey,
    pub step: ProvisioningStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDeleted {
    pub offer_id: PartitionKey,
    pub step_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferEvent {
    OfferCreated(OfferReplaced),
    OfferCreatedFromTemplate(OfferReplaced),
    OfferUpdated(OfferPropertiesUpdated),
    OfferUpdatedFromTemplate(OfferReplaced),
    OfferPublished(OfferReplaced),
    OfferDeleted(OfferDeleted),
    PlanCreated(PlanWritten),
    PlanUpdated(PlanWritten),
    PlanDeleted(PlanDeleted),
    ParameterCreated(ParameterWritten),
    ParameterUpdated(ParameterWritten),
    ParameterDeleted(ParameterDeleted),
    ProvisioningStepCreated(StepWritten),
    ProvisioningStepUpdated(StepWritten),
    ProvisioningStepDeleted(StepDeleted),
}

impl Event for OfferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OfferEvent::OfferCreated(_) => OFFER_CREATED,
            OfferEvent::OfferCreatedFromTemplate(_) => OFFER_CREATED_FROM_TEMPLATE,
            OfferEvent::OfferUpdated(_) => OFFER_UPDATED,
            OfferEvent::OfferUpdatedFromTemplate(_) => OFFER_UPDATED_FROM_TEMPLATE,
            OfferEvent::OfferPublished(_) => OFFER_PUBLISHED,
            OfferEvent::OfferDeleted(_) => OFFER_DELETED,
            OfferEvent::PlanCreated(_) => PLAN_CREATED,
            OfferEvent::PlanUpdated(_) => PLAN_UPDATED,
            OfferEvent::PlanDeleted(_) => PLAN_DELETED,
            OfferEvent::ParameterCreated(_) => PARAMETER_CREATED,
            OfferEvent::ParameterUpdated(_) => PARAMETER_UPDATED,
            OfferEvent::ParameterDeleted(_) => PARAMETER_DELETED,
            OfferEvent::ProvisioningStepCreated(_) => STEP_CREATED,
            OfferEvent::ProvisioningStepUpdated(_) => STEP_UPDATED,
            OfferEvent::ProvisioningStepDeleted(_) => STEP_DELETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn partition_key(&self) -> &PartitionKey {
        match self {
            OfferEvent::OfferCreated(e)
            | OfferEvent::OfferCreatedFromTemplate(e)
            | OfferEvent::OfferUpdatedFromTemplate(e)
            | OfferEvent::OfferPublished(e) => e.offer.offer_id(),
            OfferEvent::OfferUpdated(e) => &e.offer_id,
            OfferEvent::OfferDeleted(e) => &e.offer_id,
            OfferEvent::PlanCreated(e) | OfferEvent::PlanUpdated(e) => &e.offer_id,
            OfferEvent::PlanDeleted(e) => &e.offer_id,
            OfferEvent::ParameterCreated(e) | OfferEvent::ParameterUpdated(e) => &e.offer_id,
            OfferEvent::ParameterDeleted(e) => &e.offer_id,
            OfferEvent::ProvisioningStepCreated(e) | OfferEvent::ProvisioningStepUpdated(e) => {
                &e.offer_id
            }
            OfferEvent::ProvisioningStepDeleted(e) => &e.offer_id,
        }
    }
}

impl EventCodec for OfferEvent {
    fn encode(&self) -> Result<JsonValue, CodecError> {
        let t = self.event_type();
        match self {
            OfferEvent::OfferCreated(e)
            | OfferEvent::OfferCreatedFromTemplate(e)
            | OfferEvent::OfferUpdatedFromTemplate(e)
            | OfferEvent::OfferPublished(e) => encode_content(t, e),
            OfferEvent::OfferUpdated(e) => encode_content(t, e),
            OfferEvent::OfferDeleted(e) => encode_content(t, e),
            OfferEvent::PlanCreated(e) | OfferEvent::PlanUpdated(e) => encode_content(t, e),
            OfferEvent::PlanDeleted(e) => encode_content(t, e),
            OfferEvent::ParameterCreated(e) | OfferEvent::ParameterUpdated(e) => {
                encode_content(t, e)
            }
            OfferEvent::ParameterDeleted(e) => encode_content(t, e),
            OfferEvent::ProvisioningStepCreated(e) | OfferEvent::ProvisioningStepUpdated(e) => {
                encode_content(t, e)
            }
            OfferEvent::ProvisioningStepDeleted(e) => encode_content(t, e),
        }
    }

    fn decoder_table() -> DecoderTable<Self> {
        DecoderTable::new()
            .register(OFFER_CREATED, 1, OfferEvent::OfferCreated)
            .register(OFFER_CREATED_FROM_TEMPLATE, 1, OfferEvent::OfferCreatedFromTemplate)
            .register(OFFER_UPDATED, 1, OfferEvent::OfferUpdated)
            .register(OFFER_UPDATED_FROM_TEMPLATE, 1, OfferEvent::OfferUpdatedFromTemplate)
            .register(OFFER_PUBLISHED, 1, OfferEvent::OfferPublished)
            .register(OFFER_DELETED, 1, OfferEvent::OfferDeleted)
            .register(PLAN_CREATED, 1, OfferEvent::PlanCreated)
            .register(PLAN_UPDATED, 1, OfferEvent::PlanUpdated)
            .register(PLAN_DELETED, 1, OfferEvent::PlanDeleted)
            .register(PARAMETER_CREATED, 1, OfferEvent::ParameterCreated)
            .register(PARAMETER_UPDATED, 1, OfferEvent::ParameterUpdated)
            .register(PARAMETER_DELETED, 1, OfferEvent::ParameterDeleted)
            .register(STEP_CREATED, 1, OfferEvent::ProvisioningStepCreated)
            .register(STEP_UPDATED, 1, OfferEvent::ProvisioningStepUpdated)
            .register(STEP_DELETED, 1, OfferEvent::ProvisioningStepDeleted)
    }
}
