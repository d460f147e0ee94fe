//! Full-state application events.
//!
//! Master key values go to the secret store; events and state only keep the
//! [`MasterKeys`] references.

use marketsync_core::secret::APPLICATION_MASTER_KEY_PREFIX;
use marketsync_core::{
    AggregateRoot, Decision, DecisionContext, LifecycleStatus, PartitionKey, SecretRef,
    SecretWrite,
};

use crate::application::Application;
use crate::event::{
    ApiDeleted, ApiVersionDeleted, ApiVersionWritten, ApiWritten, ApplicationCreated,
    ApplicationDeleted, ApplicationEvent, ApplicationPublished, ApplicationUpdated,
    MasterKeysRegenerated,
};
use crate::model::{
    Api, ApiProperties, ApiVersion, ApiVersionProperties, ApplicationProperties, MasterKeyValues,
    MasterKeys,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ApplicationEventContentGenerator;

impl ApplicationEventContentGenerator {
    pub fn create_application(
        name: &PartitionKey,
        properties: &ApplicationProperties,
        keys: &MasterKeyValues,
        ctx: &DecisionContext,
    ) -> Decision<ApplicationEvent> {
        let (master_keys, writes) = Self::master_keys(keys, ctx);
        let application = Application::new(name.clone(), properties.clone(), master_keys);
        writes.into_iter().fold(
            Decision::new(ApplicationEvent::ApplicationCreated(ApplicationCreated {
                application,
            })),
            Decision::with_secret,
        )
    }

    pub fn update_application(
        name: &PartitionKey,
        properties: &ApplicationProperties,
    ) -> ApplicationEvent {
        ApplicationEvent::ApplicationUpdated(ApplicationUpdated {
            name: name.clone(),
            properties: properties.clone(),
        })
    }

    pub fn publish_application(current: &Application, comments: &str) -> ApplicationEvent {
        ApplicationEvent::ApplicationPublished(ApplicationPublished {
            application: current.clone().with_status(LifecycleStatus::Published),
            comments: comments.to_string(),
        })
    }

    /// Deleting drops the master keys once the event is committed.
    pub fn delete_application(current: &Application) -> Decision<ApplicationEvent> {
        current.master_keys().secret_names().into_iter().fold(
            Decision::new(ApplicationEvent::ApplicationDeleted(ApplicationDeleted {
                name: current.partition_key().clone(),
            })),
            |decision, name| decision.with_secret_delete(name),
        )
    }

    pub fn regenerate_master_keys(
        current: &Application,
        keys: &MasterKeyValues,
        ctx: &DecisionContext,
    ) -> Decision<ApplicationEvent> {
        let (master_keys, writes) = Self::master_keys(keys, ctx);
        let mut decision = Decision::new(ApplicationEvent::MasterKeysRegenerated(
            MasterKeysRegenerated {
                name: current.partition_key().clone(),
                master_keys,
            },
        ));
        for write in writes {
            decision = decision.with_secret(write);
        }
        for old in current.master_keys().secret_names() {
            decision = decision.with_secret_delete(old);
        }
        decision
    }

    /// A new API starts without versions.
    pub fn create_api(
        application_name: &PartitionKey,
        api_name: &str,
        properties: &ApiProperties,
    ) -> ApplicationEvent {
        ApplicationEvent::ApiCreated(ApiWritten {
            application_name: application_name.clone(),
            api: Api {
                name: api_name.to_string(),
                properties: properties.clone(),
                versions: Default::default(),
            },
        })
    }

    /// Replaces the API's properties and keeps its versions.
    pub fn update_api(
        application_name: &PartitionKey,
        current: &Api,
        properties: &ApiProperties,
    ) -> ApplicationEvent {
        ApplicationEvent::ApiUpdated(ApiWritten {
            application_name: application_name.clone(),
            api: Api {
                name: current.name.clone(),
                properties: properties.clone(),
                versions: current.versions.clone(),
            },
        })
    }

    pub fn delete_api(application_name: &PartitionKey, api_name: &str) -> ApplicationEvent {
        ApplicationEvent::ApiDeleted(ApiDeleted {
            application_name: application_name.clone(),
            api_name: api_name.to_string(),
        })
    }

    pub fn create_api_version(
        application_name: &PartitionKey,
        api_name: &str,
        version_name: &str,
        properties: &ApiVersionProperties,
    ) -> ApplicationEvent {
        ApplicationEvent::ApiVersionCreated(Self::version(
            application_name,
            api_name,
            version_name,
            properties,
        ))
    }

    pub fn update_api_version(
        application_name: &PartitionKey,
        api_name: &str,
        version_name: &str,
        properties: &ApiVersionProperties,
    ) -> ApplicationEvent {
        ApplicationEvent::ApiVersionUpdated(Self::version(
            application_name,
            api_name,
            version_name,
            properties,
        ))
    }

    pub fn delete_api_version(
        application_name: &PartitionKey,
        api_name: &str,
        version_name: &str,
    ) -> ApplicationEvent {
        ApplicationEvent::ApiVersionDeleted(ApiVersionDeleted {
            application_name: application_name.clone(),
            api_name: api_name.to_string(),
            version_name: version_name.to_string(),
        })
    }

    fn version(
        application_name: &PartitionKey,
        api_name: &str,
        version_name: &str,
        properties: &ApiVersionProperties,
    ) -> ApiVersionWritten {
        ApiVersionWritten {
            application_name: application_name.clone(),
            api_name: api_name.to_string(),
            version: ApiVersion {
                name: version_name.to_string(),
                properties: properties.clone(),
            },
        }
    }

    fn master_keys(keys: &MasterKeyValues, ctx: &DecisionContext) -> (MasterKeys, [SecretWrite; 2]) {
        let primary = SecretRef::for_event(APPLICATION_MASTER_KEY_PREFIX, ctx.event_id, "primary");
        let secondary =
            SecretRef::for_event(APPLICATION_MASTER_KEY_PREFIX, ctx.event_id, "secondary");
        let writes = [
            SecretWrite::new(primary.secret_name.clone(), keys.primary.clone()),
            SecretWrite::new(secondary.secret_name.clone(), keys.secondary.clone()),
        ];
        (MasterKeys { primary, secondary }, writes)
    }
}
