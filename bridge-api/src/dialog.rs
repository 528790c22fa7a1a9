use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Where the server says a named web dialog lives.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct DialogConfiguration {
    pub name: String,
    pub url: String,
    #[serde(default, rename = "versions")]
    pub app_versions: Vec<Value>,
}

pub trait DialogConfigurationProvider: Send + Sync {
    fn dialog_configuration(&self, name: &str) -> Option<DialogConfiguration>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticDialogConfigurations {
    configurations: HashMap<String, DialogConfiguration>,
}

#[derive(Deserialize)]
struct RawDialogConfigurations {
    #[serde(default)]
    data: Vec<Value>,
}

impl StaticDialogConfigurations {
    pub fn new(configurations: Vec<DialogConfiguration>) -> StaticDialogConfigurations {
        StaticDialogConfigurations {
            configurations: configurations
                .into_iter()
                .map(|configuration| (configuration.name.clone(), configuration))
                .collect(),
        }
    }

    /// Reads `ios_dialog_configs.data` from a server configuration response.
    /// Entries without a name or url are skipped.
    pub fn from_server_response(response: &Value) -> StaticDialogConfigurations {
        let Some(raw) = response.get("ios_dialog_configs") else {
            return StaticDialogConfigurations::default();
        };
        let raw = match RawDialogConfigurations::deserialize(raw) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("ignoring malformed dialog configurations: {}", e);
                return StaticDialogConfigurations::default();
            }
        };

        let configurations = raw
            .data
            .into_iter()
            .filter_map(|entry| DialogConfiguration::deserialize(entry).ok())
            .filter(|configuration| !configuration.name.is_empty() && !configuration.url.is_empty())
            .collect();
        StaticDialogConfigurations::new(configurations)
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

impl DialogConfigurationProvider for StaticDialogConfigurations {
    fn dialog_configuration(&self, name: &str) -> Option<DialogConfiguration> {
        self.configurations.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_server_response() {
        let response = json!({
            "ios_dialog_configs": {
                "data": [
                    {"name": "share", "url": "https://m.facebook.com/dialog/share", "versions": ["20130410", 20140410]},
                    {"name": "feed", "url": "/dialog/feed"},
                    {"name": "broken"},
                    {"url": "/dialog/nameless"},
                ]
            }
        });

        let configurations = StaticDialogConfigurations::from_server_response(&response);

        assert_eq!(configurations.len(), 2);
        let share = configurations.dialog_configuration("share").unwrap();
        assert_eq!(share.url, "https://m.facebook.com/dialog/share");
        assert_eq!(share.app_versions.len(), 2);
        assert_eq!(
            configurations.dialog_configuration("feed").unwrap().app_versions,
            Vec::<Value>::new()
        );
        assert_eq!(configurations.dialog_configuration("broken"), None);
    }

    #[test]
    fn test_missing_or_malformed_section() {
        assert!(StaticDialogConfigurations::from_server_response(&json!({})).is_empty());
        assert!(
            StaticDialogConfigurations::from_server_response(&json!({"ios_dialog_configs": []}))
                .is_empty()
        );
    }
}
