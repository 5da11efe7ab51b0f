//! Span exporter configuration from the standard OpenTelemetry environment
//! variables.

/// Default service name reported with every span
pub const DEFAULT_SERVICE_NAME: &str = "multibuild";

/// Path appended to `OTEL_EXPORTER_OTLP_ENDPOINT`
pub const TRACES_PATH: &str = "/v1/traces";

/// Where and whether to export spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    /// Full traces URL. `None` disables export.
    pub endpoint: Option<String>,
    pub service_name: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl TraceConfig {
    pub fn disabled() -> Self {
        Self {
            endpoint: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }

    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration through `lookup`:
    ///
    /// - `OTEL_SDK_DISABLED=true` disables export
    /// - `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is used as-is
    /// - otherwise `OTEL_EXPORTER_OTLP_ENDPOINT` + `/v1/traces`
    /// - `OTEL_SERVICE_NAME` overrides the service name
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let service_name = non_empty("OTEL_SERVICE_NAME")
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        let disabled = non_empty("OTEL_SDK_DISABLED")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if disabled {
            return Self {
                endpoint: None,
                service_name,
            };
        }

        let endpoint = non_empty("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT").or_else(|| {
            non_empty("OTEL_EXPORTER_OTLP_ENDPOINT")
                .map(|base| format!("{}{}", base.trim_end_matches('/'), TRACES_PATH))
        });

        Self {
            endpoint,
            service_name,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> TraceConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TraceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn nothing_configured_is_disabled() {
        let config = config(&[]);
        assert!(!config.is_enabled());
        assert_eq!(config.service_name, "multibuild");
    }

    #[test]
    fn base_endpoint_gets_traces_path() {
        let config = config(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318/")]);
        assert_eq!(config.endpoint.as_deref(), Some("http://collector:4318/v1/traces"));
    }

    #[test]
    fn traces_endpoint_wins() {
        let config = config(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318"),
            ("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", "http://other:9999/traces"),
            ("OTEL_SERVICE_NAME", "ci-builds"),
        ]);
        assert_eq!(config.endpoint.as_deref(), Some("http://other:9999/traces"));
        assert_eq!(config.service_name, "ci-builds");
    }

    #[test]
    fn sdk_disabled_overrides_endpoint() {
        let config = config(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318"),
            ("OTEL_SDK_DISABLED", "TRUE"),
        ]);
        assert!(!config.is_enabled());
    }
}
