//! Runtime environment detection.
//!
//! An optional probe program prints `KEY=VALUE` lines describing the runtime
//! the backend sessions need (install prefixes, library paths). The result is
//! passed to every launched session.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use crate::config::schema::EnvironmentConfig;

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("failed to run environment probe {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("environment probe {program} exited with {status}")]
    ProbeFailed { program: String, status: ExitStatus },
    #[error("required environment variable {0} was not detected")]
    Missing(String),
}

/// Variables detected at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedEnvironment {
    vars: BTreeMap<String, String>,
}

impl DetectedEnvironment {
    /// Parse probe output. Blank lines, `#` comments and lines without a
    /// valid key are skipped; a later line overrides an earlier one.
    pub fn parse(output: &str) -> Self {
        let vars = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .filter(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn run_probe(program: &Path, args: &[String]) -> Result<DetectedEnvironment, EnvironmentError> {
    let name = program.display().to_string();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|source| EnvironmentError::Spawn {
            program: name.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(EnvironmentError::ProbeFailed {
            program: name,
            status: output.status,
        });
    }
    Ok(DetectedEnvironment::parse(&String::from_utf8_lossy(&output.stdout)))
}

/// Run the configured probe and check the required variables.
///
/// Required variables missing from the probe output are taken from the
/// gateway's own environment when present there.
pub fn detect(config: &EnvironmentConfig) -> Result<DetectedEnvironment, EnvironmentError> {
    let mut environment = match &config.probe_program {
        Some(program) => run_probe(program, &config.probe_args)?,
        None => DetectedEnvironment::default(),
    };

    for key in &config.required {
        if environment.get(key).is_some() {
            continue;
        }
        match std::env::var(key) {
            Ok(value) => environment.insert(key.clone(), value),
            Err(_) => return Err(EnvironmentError::Missing(key.clone())),
        }
    }

    tracing::debug!(variables = environment.len(), "Environment detected");
    Ok(environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn probe(script: &str, required: &[&str]) -> EnvironmentConfig {
        EnvironmentConfig {
            probe_program: Some(PathBuf::from("/bin/sh")),
            probe_args: vec!["-c".into(), script.into()],
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_probe_output() {
        let env = DetectedEnvironment::parse("# comment\nR_HOME=/usr/lib/R\n\nBAD LINE=1\nnoequals\nOPTS=a=b\n");
        assert_eq!(env.get("R_HOME"), Some("/usr/lib/R"));
        assert_eq!(env.get("OPTS"), Some("a=b"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_detect_runs_probe() {
        let env = detect(&probe("echo APP_HOME=/opt/app; echo APP_LIB=/opt/app/lib", &["APP_HOME"])).unwrap();
        assert_eq!(env.get("APP_HOME"), Some("/opt/app"));
        assert_eq!(env.get("APP_LIB"), Some("/opt/app/lib"));
    }

    #[test]
    fn test_missing_required_variable() {
        let err = detect(&probe("echo A=1", &["SESSION_GATEWAY_TEST_UNSET_VARIABLE"])).unwrap_err();
        assert!(matches!(err, EnvironmentError::Missing(ref key) if key == "SESSION_GATEWAY_TEST_UNSET_VARIABLE"));
    }

    #[test]
    fn test_failing_probe() {
        let err = detect(&probe("exit 3", &[])).unwrap_err();
        assert!(matches!(err, EnvironmentError::ProbeFailed { .. }));
    }

    #[test]
    fn test_no_probe_is_empty() {
        assert!(detect(&EnvironmentConfig::default()).unwrap().is_empty());
    }
}
