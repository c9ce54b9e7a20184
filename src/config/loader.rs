//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a TOML file. Missing sections and fields take their defaults.
pub fn parse_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Accept a fully assembled configuration if it passes validation.
pub fn validated(config: ProxyConfig) -> Result<ProxyConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[upstream]\ntarget = \"http://10.0.0.5:3000\"\nproxy = \"\"\n"
        )
        .unwrap();

        let config = validated(parse_config(file.path()).unwrap()).unwrap();
        assert_eq!(config.upstream.target, "http://10.0.0.5:3000");
        assert_eq!(config.upstream.proxy.as_deref(), Some(""));
    }

    #[test]
    fn missing_file_names_path() {
        let err = parse_config(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[upstream\ntarget = 1").unwrap();
        assert!(matches!(
            parse_config(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_lists_every_problem() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.upstream.target = "gopher://old.example".into();

        let err = validated(config).unwrap_err();
        let ConfigError::Validation(errors) = &err else {
            panic!("expected validation error, got {err}");
        };
        assert_eq!(errors.len(), 2);
        assert!(err.to_string().contains("nowhere"));
        assert!(err.to_string().contains("gopher"));
    }
}
