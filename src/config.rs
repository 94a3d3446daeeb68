//! Store credentials and bucket settings, read from the environment

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} not found")]
    Missing(&'static str),
    #[error("{name} has invalid value {value:?}: expected 1/0, true/false or yes/no")]
    InvalidBool { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    /// Custom S3-compatible endpoint, e.g. `https://<account>.r2.cloudflarestorage.com`
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    /// Grant public-read on the assembled object
    pub public_read: bool,
}

impl AwsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));
        let flag = |name: &'static str, default: bool| match get(name) {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidBool { name, value }),
            None => Ok(default),
        };

        Ok(Self {
            access_key_id: required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
            region: required("AWS_REGION")?,
            bucket: required("AWS_BUCKET")?,
            endpoint_url: get("AWS_ENDPOINT_URL").map(|url| url.trim_end_matches('/').to_string()),
            force_path_style: flag("AWS_FORCE_PATH_STYLE", false)?,
            public_read: flag("UPPY_PUBLIC_READ", true)?,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
        ("AWS_SECRET_ACCESS_KEY", "secret"),
        ("AWS_REGION", "us-east-1"),
        ("AWS_BUCKET", "uploads"),
    ];

    #[test]
    fn required_variables_with_defaults() {
        let config = AwsConfig::from_lookup(env(&REQUIRED)).unwrap();
        assert_eq!(config.bucket, "uploads");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint_url, None);
        assert!(!config.force_path_style);
        assert!(config.public_read);
    }

    #[test]
    fn missing_variable_is_named() {
        let err = AwsConfig::from_lookup(env(&REQUIRED[..3])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("AWS_BUCKET"));
        assert_eq!(err.to_string(), "AWS_BUCKET not found");

        let mut blank = REQUIRED.to_vec();
        blank[0] = ("AWS_ACCESS_KEY_ID", "  ");
        assert_eq!(
            AwsConfig::from_lookup(env(&blank)).unwrap_err(),
            ConfigError::Missing("AWS_ACCESS_KEY_ID")
        );
    }

    #[test]
    fn optional_settings_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("AWS_ENDPOINT_URL", "http://localhost:9000/"));
        pairs.push(("AWS_FORCE_PATH_STYLE", "Yes"));
        pairs.push(("UPPY_PUBLIC_READ", "0"));
        let config = AwsConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.force_path_style);
        assert!(!config.public_read);
    }

    #[test]
    fn malformed_flag_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("AWS_FORCE_PATH_STYLE", "maybe"));
        assert_eq!(
            AwsConfig::from_lookup(env(&pairs)).unwrap_err(),
            ConfigError::InvalidBool {
                name: "AWS_FORCE_PATH_STYLE",
                value: "maybe".to_string()
            }
        );
    }
}
