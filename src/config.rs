//! Configuration for the stub server.
//!
//! Defines services, their route tables, global template variables and
//! runtime settings.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Global template variables, shared read-only by every route.
pub type GlobalVars = HashMap<String, String>;

/// Main configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Port of the default endpoint (no default endpoint when absent)
    #[serde(default)]
    pub port: Option<String>,

    /// Variables available to every body template
    #[serde(default)]
    pub vars: GlobalVars,

    /// Runtime settings
    #[serde(default)]
    pub settings: Settings,

    /// Services to launch
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.stats_buffer == 0 {
            return Err(ConfigError::Invalid(
                "settings.stats_buffer must be greater than zero".to_string(),
            ));
        }
        for (i, service) in self.services.iter().enumerate() {
            service
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("service {}: {}", i, e)))?;
        }
        Ok(())
    }

    /// Total number of routes across all services, counting each method of a
    /// multi-method path separately.
    pub fn route_count(&self) -> usize {
        self.services
            .iter()
            .flat_map(|s| s.routes.values())
            .map(|r| r.methods.len().max(1))
            .sum()
    }
}

/// Kind of service. Only HTTP services are served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceType {
    #[default]
    #[serde(rename = "HTTP", alias = "http")]
    Http,
    #[serde(other)]
    Unsupported,
}

/// A named route table bound to the default or a dedicated endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service name, used in logs
    #[serde(default)]
    pub name: String,

    /// Service type
    #[serde(default, rename = "type")]
    pub kind: ServiceType,

    /// Dedicated port; the default endpoint is used when absent
    #[serde(default)]
    pub port: Option<String>,

    /// Route table, keyed by path
    #[serde(default)]
    pub routes: HashMap<String, RouteSpec>,
}

impl ServiceConfig {
    /// Validate the service definition.
    pub fn validate(&self) -> Result<(), String> {
        for (path, route) in &self.routes {
            if !path.starts_with('/') {
                return Err(format!("route path {:?} must start with '/'", path));
            }
            route
                .validate()
                .map_err(|e| format!("route {}: {}", path, e))?;
        }
        Ok(())
    }
}

/// A route as authored in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RouteSpec {
    /// HTTP method (defaults to GET)
    #[serde(default)]
    pub method: String,

    /// Per-method routes for the same path; overrides `method` when non-empty
    #[serde(default)]
    pub methods: HashMap<String, RouteSpec>,

    /// Inline body template
    #[serde(default)]
    pub body: String,

    /// Body template loaded from a file when `body` is empty
    #[serde(default, alias = "bodyFile")]
    pub body_file: String,

    /// Response status code (0 = default)
    #[serde(default, alias = "status_code", alias = "statusCode")]
    pub code: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Reserved handler extension, not used by dispatch
    #[serde(default)]
    pub handler: Option<HandlerSpec>,
}

impl RouteSpec {
    /// Validate the route definition.
    pub fn validate(&self) -> Result<(), String> {
        if self.code != 0 && !(100..=599).contains(&self.code) {
            return Err(format!("invalid status code: {}", self.code));
        }
        for (method, nested) in &self.methods {
            if method.is_empty() {
                return Err("method key cannot be empty".to_string());
            }
            nested.validate()?;
        }
        Ok(())
    }
}

/// Reserved handler extension point.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HandlerSpec {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub template: String,
    #[serde(default, alias = "templateFile")]
    pub template_file: String,
}

/// What to do when a route is registered twice for the same method and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRoutePolicy {
    /// Replace the earlier route and log a warning
    #[default]
    Warn,
    /// Keep the earlier route and report an error
    Reject,
}

/// What to do when the stats channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the new event and count it
    #[default]
    DropNewest,
    /// Wait for the collector to make room
    Block,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Serve an empty body when a body file cannot be loaded, instead of
    /// skipping the route
    #[serde(default = "default_true")]
    pub degrade_on_template_error: bool,

    /// Duplicate route handling
    #[serde(default)]
    pub duplicate_routes: DuplicateRoutePolicy,

    /// Capacity of the stats event channel
    #[serde(default = "default_stats_buffer")]
    pub stats_buffer: usize,

    /// Stats channel overflow handling
    #[serde(default)]
    pub stats_overflow: OverflowPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            degrade_on_template_error: true,
            duplicate_routes: DuplicateRoutePolicy::default(),
            stats_buffer: default_stats_buffer(),
            stats_overflow: OverflowPolicy::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_stats_buffer() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_route() {
        let yaml = r#"
port: "8080"
vars:
  name: World
services:
  - name: hello
    routes:
      /hello:
        body: "Hello, {{name}}!"
        headers:
          X-Test: "1"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.port.as_deref(), Some("8080"));
        assert_eq!(config.vars.get("name"), Some(&"World".to_string()));
        assert_eq!(config.services.len(), 1);

        let service = &config.services[0];
        assert_eq!(service.kind, ServiceType::Http);
        assert!(service.port.is_none());

        let route = &service.routes["/hello"];
        assert_eq!(route.body, "Hello, {{name}}!");
        assert_eq!(route.code, 0);
        assert_eq!(route.headers.get("X-Test"), Some(&"1".to_string()));
    }

    #[test]
    fn test_parse_multi_method_route() {
        let yaml = r#"
services:
  - name: multi
    type: HTTP
    port: "9000"
    routes:
      /multi:
        methods:
          GET:
            code: 200
            body: g
          POST:
            statusCode: 201
            body: p
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let route = &config.services[0].routes["/multi"];
        assert_eq!(route.methods.len(), 2);
        assert_eq!(route.methods["POST"].code, 201);
        assert_eq!(config.route_count(), 2);
    }

    #[test]
    fn test_parse_body_file_aliases() {
        let yaml = r#"
services:
  - routes:
      /a:
        body_file: a.json
      /b:
        bodyFile: b.json
        handler:
          type: template
          templateFile: b.tpl
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let routes = &config.services[0].routes;
        assert_eq!(routes["/a"].body_file, "a.json");
        assert_eq!(routes["/b"].body_file, "b.json");
        assert_eq!(
            routes["/b"].handler.as_ref().unwrap().template_file,
            "b.tpl"
        );
    }

    #[test]
    fn test_default_settings() {
        let config = Config::from_yaml("services: []").unwrap();
        assert!(config.settings.degrade_on_template_error);
        assert_eq!(config.settings.duplicate_routes, DuplicateRoutePolicy::Warn);
        assert_eq!(config.settings.stats_buffer, 1024);
        assert_eq!(config.settings.stats_overflow, OverflowPolicy::DropNewest);
    }

    #[test]
    fn test_parse_settings() {
        let yaml = r#"
settings:
  degrade_on_template_error: false
  duplicate_routes: reject
  stats_buffer: 8
  stats_overflow: block
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(!config.settings.degrade_on_template_error);
        assert_eq!(config.settings.duplicate_routes, DuplicateRoutePolicy::Reject);
        assert_eq!(config.settings.stats_buffer, 8);
        assert_eq!(config.settings.stats_overflow, OverflowPolicy::Block);
    }

    #[test]
    fn test_unsupported_service_type() {
        let yaml = r#"
services:
  - name: queue
    type: AMQP
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.services[0].kind, ServiceType::Unsupported);
    }

    #[test]
    fn test_invalid_status_code() {
        let yaml = r#"
services:
  - routes:
      /bad:
        code: 42
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_path() {
        let yaml = r#"
services:
  - routes:
      hello:
        body: hi
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_stats_buffer() {
        let yaml = r#"
settings:
  stats_buffer: 0
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
services:
  - routes:
      /hello:
        bogus: true
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::from_yaml(include_str!("../config/default-config.yaml")).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.route_count(), 5);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/golem.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
