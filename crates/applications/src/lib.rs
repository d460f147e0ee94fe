//! Published applications domain module (event-sourced).
//!
//! Applications own their APIs, and each API owns its versions. Master keys are
//! referenced by secret name only.

pub mod application;
pub mod event;
pub mod generator;
pub mod model;

pub use application::{Application, ApplicationCommand};
pub use event::ApplicationEvent;
pub use generator::ApplicationEventContentGenerator;
pub use model::{
    Api, ApiProperties, ApiType, ApiVersion, ApiVersionProperties, ApiVersionType,
    ApplicationProperties, ApplicationTag, MasterKeyValues, MasterKeys, VersionEndpoint,
};
