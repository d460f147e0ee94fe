//! Marketplace offers domain module (event-sourced).
//!
//! Offers with their plans, parameters and provisioning steps, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage).

pub mod event;
pub mod generator;
pub mod model;
pub mod offer;

pub use event::OfferEvent;
pub use generator::OfferEventContentGenerator;
pub use model::{
    OfferProperties, OfferTemplate, Parameter, ParameterValueType, Plan, PlanMode, PlanProperties,
    ProvisioningStep, StepDefinition, StepProperties, StepRequest, StepType, WebhookAuthType,
};
pub use offer::{Offer, OfferCommand};
