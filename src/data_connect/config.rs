use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::data_connect::constants::{
    DEFAULT_DATA_CONNECT_HOST, DEFAULT_EMULATOR_HOST, DEFAULT_EMULATOR_PORT, EMULATOR_HOST_ENV_VAR,
};
use crate::data_connect::error::{invalid_argument, DataConnectResult};

/// Connector coordinates (location/connector/service) supplied by the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct ConnectorConfig {
    pub location: String,
    pub connector: String,
    pub service: String,
}

impl ConnectorConfig {
    /// Validates and constructs a new connector configuration.
    pub fn new(
        location: impl Into<String>,
        connector: impl Into<String>,
        service: impl Into<String>,
    ) -> DataConnectResult<Self> {
        let config = Self {
            location: location.into(),
            connector: connector.into(),
            service: service.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Ensures mandatory fields are present.
    pub fn validate(&self) -> DataConnectResult<()> {
        if self.location.trim().is_empty() {
            return Err(invalid_argument("location is required"));
        }
        if self.connector.trim().is_empty() {
            return Err(invalid_argument("connector is required"));
        }
        if self.service.trim().is_empty() {
            return Err(invalid_argument("service is required"));
        }
        Ok(())
    }
}

impl Display for ConnectorConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.location, self.service, self.connector)
    }
}

/// Fully-qualified options passed to the transport layer once the project ID is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConnectOptions {
    pub connector: ConnectorConfig,
    pub project_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
}

impl DataConnectOptions {
    pub fn new(
        connector: ConnectorConfig,
        project_id: impl Into<String>,
    ) -> DataConnectResult<Self> {
        let options = Self {
            connector,
            project_id: project_id.into(),
            api_key: None,
            app_id: None,
        };
        options.connector.validate()?;
        if options.project_id.trim().is_empty() {
            return Err(invalid_argument("project_id is required"));
        }
        Ok(options)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Returns the canonical resource path for this connector (without the API host).
    pub fn resource_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/services/{}/connectors/{}",
            self.project_id,
            self.connector.location,
            self.connector.service,
            self.connector.connector
        )
    }
}

/// Host/port/SSL tuple describing where requests are sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConnectSettings {
    pub host: String,
    pub port: Option<u16>,
    pub ssl_enabled: bool,
}

impl DataConnectSettings {
    pub fn new(host: impl Into<String>, port: Option<u16>, ssl_enabled: bool) -> Self {
        Self {
            host: host.into(),
            port,
            ssl_enabled,
        }
    }

    /// Plain-text settings pointing at a local emulator.
    pub fn emulator(host: Option<&str>, port: Option<u16>) -> Self {
        Self::new(
            host.unwrap_or(DEFAULT_EMULATOR_HOST),
            Some(port.unwrap_or(DEFAULT_EMULATOR_PORT)),
            false,
        )
    }

    /// Reads emulator routing from `FIREBASE_DATA_CONNECT_EMULATOR_HOST`, if set.
    pub fn from_env() -> DataConnectResult<Option<Self>> {
        match std::env::var(EMULATOR_HOST_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => parse_emulator_host(value.trim()).map(Some),
            _ => Ok(None),
        }
    }

    /// Builds the base URL given the configured host/port.
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl_enabled { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}", self.host),
            None => format!("{scheme}://{}", self.host),
        }
    }
}

impl Default for DataConnectSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_DATA_CONNECT_HOST.to_string(),
            port: None,
            ssl_enabled: true,
        }
    }
}

/// Parses an emulator host declaration such as `http://localhost:9399` or `localhost:9399`.
///
/// A missing scheme means plain-text HTTP, matching how emulators are normally served.
pub fn parse_emulator_host(spec: &str) -> DataConnectResult<DataConnectSettings> {
    let (protocol, rest) = spec.split_once("://").unwrap_or(("http", spec));
    let ssl_enabled = match protocol {
        "http" => false,
        "https" => true,
        other => {
            return Err(invalid_argument(format!(
                "Unsupported protocol '{other}' in emulator host"
            )))
        }
    };

    let (host, port) = if let Some((host, port)) = rest.split_once(':') {
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid_argument("Port must be a number in emulator host declaration"))?;
        (host.to_string(), Some(port))
    } else {
        (rest.to_string(), None)
    };

    if host.trim().is_empty() {
        return Err(invalid_argument(
            "Host is required for emulator connections",
        ));
    }

    Ok(DataConnectSettings::new(host, port, ssl_enabled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_config_requires_all_fields() {
        let err = ConnectorConfig::new("us-central1", "", "movies").unwrap_err();
        assert_eq!(err.code_str(), "data-connect/invalid-argument");
        assert!(ConnectorConfig::new("us-central1", "default", "movies").is_ok());
    }

    #[test]
    fn resource_path_matches_backend_layout() {
        let connector = ConnectorConfig::new("us-central1", "crud", "movies").unwrap();
        let options = DataConnectOptions::new(connector, "demo-project").unwrap();
        assert_eq!(
            options.resource_path(),
            "projects/demo-project/locations/us-central1/services/movies/connectors/crud"
        );
    }

    #[test]
    fn empty_project_id_is_rejected() {
        let connector = ConnectorConfig::new("us-central1", "crud", "movies").unwrap();
        assert!(DataConnectOptions::new(connector, "  ").is_err());
    }

    #[test]
    fn parses_emulator_hosts() {
        let settings = parse_emulator_host("localhost:9399").unwrap();
        assert_eq!(settings.base_url(), "http://localhost:9399");

        let settings = parse_emulator_host("https://dc.example.com").unwrap();
        assert!(settings.ssl_enabled);
        assert_eq!(settings.base_url(), "https://dc.example.com");

        assert!(parse_emulator_host("ftp://localhost").is_err());
        assert!(parse_emulator_host("localhost:port").is_err());
        assert!(parse_emulator_host(":9399").is_err());
    }

    #[test]
    fn default_settings_target_production() {
        let settings = DataConnectSettings::default();
        assert_eq!(
            settings.base_url(),
            "https://firebasedataconnect.googleapis.com"
        );
        assert_eq!(
            DataConnectSettings::emulator(None, None).base_url(),
            "http://127.0.0.1:9399"
        );
    }
}
