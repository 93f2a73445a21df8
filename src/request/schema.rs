use jsonschema::JSONSchema;
use serde_json::Value;

use crate::request::message::RequestError;

/// included job request schema
static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/job_request.json"));

pub fn load_schema() -> Result<JSONSchema, RequestError> {
    let schema_json: Value = serde_json::from_str(SCHEMA).map_err(RequestError::Schema)?;
    compile_schema(&schema_json)
}

fn compile_schema(schema: &Value) -> Result<JSONSchema, RequestError> {
    JSONSchema::compile(schema).map_err(|err| RequestError::SchemaCompile(err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn embedded_schema_compiles() {
        assert!(load_schema().is_ok());
    }

    #[test]
    fn schema_rejects_unknown_fields_and_wrong_types() {
        let schema = load_schema().unwrap();
        assert!(schema.is_valid(&json!({"name": "mpipool-test", "node_count": 2})));
        assert!(!schema.is_valid(&json!({"nodes": 2})));
        assert!(!schema.is_valid(&json!({"node_count": "two"})));
        assert!(!schema.is_valid(&json!({"env_activation": {"script": "a", "command": "b"}})));
    }
}
