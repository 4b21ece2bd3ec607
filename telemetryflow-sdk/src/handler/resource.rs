use crate::config::TelemetryConfig;
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

const SERVICE_NAME: &str = "service.name";
const SERVICE_VERSION: &str = "service.version";
const SERVICE_NAMESPACE: &str = "service.namespace";
const DEPLOYMENT_ENVIRONMENT_NAME: &str = "deployment.environment.name";
const HOST_NAME: &str = "host.name";
const COLLECTOR_ID: &str = "telemetryflow.collector.id";
const COLLECTOR_NAME: &str = "telemetryflow.collector.name";
const COLLECTOR_DESCRIPTION: &str = "telemetryflow.collector.description";
const COLLECTOR_TAG_PREFIX: &str = "telemetryflow.collector.tag.";
const DATACENTER: &str = "telemetryflow.datacenter";

/// Builds the resource shared by every provider.
///
/// Custom attributes are applied after the service attributes and may
/// override them.
pub(crate) fn build_resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, config.service_name().to_string()),
        KeyValue::new(SERVICE_VERSION, config.service_version().to_string()),
        KeyValue::new(SERVICE_NAMESPACE, config.service_namespace().to_string()),
        KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, config.environment().to_string()),
    ];

    let collector = config.collector();
    if collector.enrich_resources {
        let optional = [
            (COLLECTOR_ID, &collector.id),
            (COLLECTOR_NAME, &collector.name),
            (COLLECTOR_DESCRIPTION, &collector.description),
            (HOST_NAME, &collector.hostname),
        ];
        attributes.extend(
            optional
                .into_iter()
                .filter_map(|(key, value)| Some(KeyValue::new(key, value.clone()?))),
        );
        attributes.extend(collector.tags.iter().map(|(key, value)| {
            KeyValue::new(format!("{COLLECTOR_TAG_PREFIX}{key}"), value.clone())
        }));
        attributes.push(KeyValue::new(DATACENTER, config.datacenter().to_string()));
    }

    attributes.extend(
        config
            .custom_attributes()
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
    );

    Resource::builder().with_attributes(attributes).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use opentelemetry::{Key, Value};

    fn config() -> TelemetryConfig {
        let mut config = TelemetryConfig::new(
            Credentials::new("tfk_x", "tfs_y").unwrap(),
            "localhost:4317",
            "checkout",
        );
        config
            .with_service_version("2.1.0")
            .with_environment("staging")
            .with_datacenter("eu-west")
            .with_collector_id("col-1")
            .with_collector_hostname("node-7")
            .with_collector_tag("team", "payments");
        config
    }

    fn get(resource: &Resource, key: &'static str) -> Option<Value> {
        resource.get(&Key::from_static_str(key))
    }

    #[test]
    fn carries_service_identity() {
        let resource = build_resource(&config());
        assert_eq!(get(&resource, SERVICE_NAME), Some("checkout".into()));
        assert_eq!(get(&resource, SERVICE_VERSION), Some("2.1.0".into()));
        assert_eq!(
            get(&resource, DEPLOYMENT_ENVIRONMENT_NAME),
            Some("staging".into())
        );
    }

    #[test]
    fn enrichment_adds_collector_identity() {
        let resource = build_resource(&config());
        assert_eq!(get(&resource, COLLECTOR_ID), Some("col-1".into()));
        assert_eq!(get(&resource, HOST_NAME), Some("node-7".into()));
        assert_eq!(get(&resource, DATACENTER), Some("eu-west".into()));
        assert_eq!(
            get(&resource, "telemetryflow.collector.tag.team"),
            Some("payments".into())
        );
        assert_eq!(get(&resource, COLLECTOR_DESCRIPTION), None);
    }

    #[test]
    fn enrichment_can_be_disabled() {
        let mut config = config();
        config.with_enrich_resources(false);
        let resource = build_resource(&config);
        assert_eq!(get(&resource, COLLECTOR_ID), None);
        assert_eq!(get(&resource, DATACENTER), None);
        assert_eq!(get(&resource, SERVICE_NAME), Some("checkout".into()));
    }

    #[test]
    fn custom_attributes_are_included() {
        let mut config = config();
        config.with_custom_attribute("tenant", "acme");
        let resource = build_resource(&config);
        assert_eq!(get(&resource, "tenant"), Some("acme".into()));
    }
}
