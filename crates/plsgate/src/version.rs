//! Version information for plsgate.

/// Name reported as `SERVER_SOFTWARE` and `PLSQL_GATEWAY`.
pub const GATEWAY_NAME: &str = "plsgate";

/// plsgate version from Cargo.toml
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub plsgate: &'static str,
    /// Version of the Oracle client library, when linked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_client: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            plsgate: GATEWAY_VERSION,
            oracle_client: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oracle_client(mut self, version: String) -> Self {
        self.oracle_client = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_gateway_version() {
        let info = VersionInfo::new();
        assert_eq!(info.plsgate, GATEWAY_VERSION);
        assert!(info.oracle_client.is_none());
    }

    #[test]
    fn version_info_serializes_minimal() {
        let info = VersionInfo {
            plsgate: "0.1.0",
            oracle_client: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "plsgate": "0.1.0"
        }
        "#);
    }

    #[test]
    fn version_info_serializes_client_version() {
        let info = VersionInfo::new().with_oracle_client("19.3.0.0.0".to_string());
        assert_eq!(
            serde_json::to_value(&info).unwrap()["oracle_client"],
            "19.3.0.0.0"
        );
    }
}
