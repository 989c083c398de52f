//! Label and annotation keys recorded on workloads and their pods.

use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

pub const GUID: &str = "cloudfoundry.org/guid";
pub const VERSION: &str = "cloudfoundry.org/version";
pub const SOURCE_TYPE: &str = "cloudfoundry.org/source_type";
pub const APP_GUID: &str = "cloudfoundry.org/app_guid";
pub const PROCESS_TYPE: &str = "cloudfoundry.org/process_type";
pub const ROOTFS_VERSION: &str = "cloudfoundry.org/rootfs-version";

/// The source type of every workload managed here.
pub const APP_SOURCE_TYPE: &str = "APP";

pub mod annotations {
    pub const PROCESS_GUID: &str = "cloudfoundry.org/process_guid";
    pub const APP_URIS: &str = "cloudfoundry.org/application_uris";
    pub const APP_NAME: &str = "cloudfoundry.org/application_name";
    pub const APP_ID: &str = "cloudfoundry.org/application_id";
    pub const VERSION: &str = "cloudfoundry.org/version";
    pub const ORIGINAL_REQUEST: &str = "cloudfoundry.org/original_request";
    pub const REGISTERED_ROUTES: &str = "cloudfoundry.org/routes";
    pub const SPACE_NAME: &str = "cloudfoundry.org/space_name";
    pub const SPACE_GUID: &str = "cloudfoundry.org/space_guid";
    pub const ORG_NAME: &str = "cloudfoundry.org/org_name";
    pub const ORG_GUID: &str = "cloudfoundry.org/org_guid";
    pub const LAST_UPDATED: &str = "cloudfoundry.org/last_updated";

    /// Keys owned by the mapper. Everything else on a pod template is user-defined.
    pub const MANAGED: &[&str] = &[
        PROCESS_GUID,
        APP_URIS,
        APP_NAME,
        APP_ID,
        VERSION,
        ORIGINAL_REQUEST,
        REGISTERED_ROUTES,
        SPACE_NAME,
        SPACE_GUID,
        ORG_NAME,
        ORG_GUID,
        LAST_UPDATED,
    ];
}

/// Selects every workload (and pod) for a single LRP identifier.
pub fn identifier_selector(guid: &str, version: &str) -> String {
    format!("{GUID}={guid},{VERSION}={version}")
}

/// Selects every app workload (and pod) in the namespace.
pub fn app_selector() -> String {
    format!("{SOURCE_TYPE}={APP_SOURCE_TYPE}")
}

/// Renders `matchLabels` as an equality-based selector string.
pub fn to_selector(labels: &Map) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Tests an equality-based selector (`k=v,k2=v2`) against a label map.
pub fn matches(selector: &str, labels: &Map) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_selector_matches_only_its_identifier() {
        let selector = identifier_selector("guid_1234", "version_1234");
        assert_eq!(
            selector,
            "cloudfoundry.org/guid=guid_1234,cloudfoundry.org/version=version_1234"
        );

        let mut labels = Map::new();
        labels.insert(GUID.to_string(), "guid_1234".to_string());
        labels.insert(VERSION.to_string(), "version_1234".to_string());
        labels.insert(SOURCE_TYPE.to_string(), APP_SOURCE_TYPE.to_string());
        assert!(matches(&selector, &labels));
        assert!(matches(&app_selector(), &labels));

        labels.insert(VERSION.to_string(), "version_5678".to_string());
        assert!(!matches(&selector, &labels));
    }

    #[test]
    fn renders_match_labels() {
        let labels = [("b", "2"), ("a", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Map>();
        assert_eq!(to_selector(&labels), "a=1,b=2");
    }
}
