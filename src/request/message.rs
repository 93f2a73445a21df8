use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::request::job::JobRequest;
use crate::request::schema::load_schema;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("can't read job request {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("job request {path} is not valid JSON: {source}")]
    JsonDecode { path: PathBuf, source: serde_json::Error },
    #[error("job request {path} fails schema validation: {}", .errors.join("; "))]
    Validation { path: PathBuf, errors: Vec<String> },
    #[error("job request {path} can't be deserialised: {source}")]
    Deserialisation { path: PathBuf, source: serde_json::Error },
    #[error("embedded job request schema is not valid JSON: {0}")]
    Schema(serde_json::Error),
    #[error("embedded job request schema doesn't compile: {0}")]
    SchemaCompile(String),
}

/// A job request file on disk
pub struct Message {
    pub path: PathBuf,
    pub compiled_schema: JSONSchema,
}

impl Message {
    pub fn new(path: &Path) -> Result<Message, RequestError> {
        Ok(Message { path: path.to_path_buf(), compiled_schema: load_schema()? })
    }

    pub fn read(&self) -> Result<JobRequest, RequestError> {
        let json: Value = self.parse_untyped_json()?;

        match self.validate(&json) {
            Ok(_) => {
                info!("Job request is valid");
                self.parse_json(json)
            }
            Err(err) => {
                warn!("Job request fails validation");
                Err(err)
            }
        }
    }

    fn validate(&self, json: &Value) -> Result<(), RequestError> {
        info!("Validating raw job request against JSON schema");
        self.compiled_schema.validate(json).map_err(|errors| {
            let errors = errors
                .map(|err| format!("{} (at '{}')", err, err.instance_path))
                .collect();
            RequestError::Validation { path: self.path.clone(), errors }
        })
    }

    fn read_file(&self) -> Result<String, RequestError> {
        let path: &Path = self.path.as_path();
        info!("Reading job request at {}", path.display());
        fs::read_to_string(path).map_err(|source| {
            warn!("Can't read job request at path {}: {}", path.display(), source);
            RequestError::Read { path: self.path.clone(), source }
        })
    }

    fn parse_json(&self, value: Value) -> Result<JobRequest, RequestError> {
        info!("Deserialising valid JSON into typed job request");
        serde_json::from_value::<JobRequest>(value)
            .map_err(|source| RequestError::Deserialisation { path: self.path.clone(), source })
    }

    fn parse_untyped_json(&self) -> Result<Value, RequestError> {
        let json_string = self.read_file()?;
        serde_json::from_str::<Value>(&json_string)
            .map_err(|source| RequestError::JsonDecode { path: self.path.clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::request::job::ActivationRequest;

    fn write_request(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_a_valid_request() {
        let (_dir, path) = write_request(
            r#"{
                "name": "mpipool-test",
                "node_count": 1,
                "time_limit": "00:20:00",
                "partition": "gen",
                "env_activation": {"script": "venv/bin/activate"},
                "entry_point": "demo.py",
                "entry_args": ["--size", "128"]
            }"#,
        );

        let request = Message::new(&path).unwrap().read().unwrap();
        assert_eq!(request.name.as_deref(), Some("mpipool-test"));
        assert_eq!(request.node_count, Some(1));
        assert_eq!(
            request.env_activation,
            Some(ActivationRequest::Script(PathBuf::from("venv/bin/activate")))
        );
        assert_eq!(request.entry_args.unwrap(), vec!["--size", "128"]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let message = Message::new(&dir.path().join("nope.json")).unwrap();
        assert!(matches!(message.read(), Err(RequestError::Read { .. })));
    }

    #[test]
    fn broken_json_is_a_decode_error() {
        let (_dir, path) = write_request("{ \"name\": ");
        let message = Message::new(&path).unwrap();
        assert!(matches!(message.read(), Err(RequestError::JsonDecode { .. })));
    }

    #[test]
    fn schema_violations_are_reported() {
        let (_dir, path) = write_request(r#"{"name": "x", "nodes": 4}"#);
        let message = Message::new(&path).unwrap();
        match message.read() {
            Err(RequestError::Validation { errors, .. }) => assert!(!errors.is_empty()),
            other => panic!("expected a validation error, got {other:?}"),
        }
    }
}
