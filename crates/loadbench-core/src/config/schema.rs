use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::{Value, json};

use crate::config::TaskConfigError;

static VALIDATORS: OnceLock<Result<[Validator; 2], String>> = OnceLock::new();

pub const SUPPORTED_VERSIONS: [u64; 2] = [1, 2];

fn hook_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "description": {"type": "string"},
            "args": {},
            "trigger": {
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "args": {}
                },
                "required": ["name", "args"],
                "additionalProperties": false
            }
        },
        "required": ["name", "args", "trigger"],
        "additionalProperties": false
    })
}

fn runner_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"type": {"type": "string"}},
        "required": ["type"]
    })
}

pub fn v1_schema() -> Value {
    json!({
        "type": "object",
        "patternProperties": {
            ".*": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "args": {"type": "object"},
                        "description": {"type": "string"},
                        "runner": runner_schema(),
                        "context": {"type": "object"},
                        "sla": {"type": "object"},
                        "hooks": {"type": "array", "items": hook_schema()}
                    },
                    "additionalProperties": false
                }
            }
        }
    })
}

pub fn v2_schema() -> Value {
    let string_list = json!({"type": "array", "items": {"type": "string"}});

    json!({
        "type": "object",
        "properties": {
            "version": {"type": "number"},
            "title": {"type": "string"},
            "description": {"type": "string"},
            "tags": string_list.clone(),
            "subtasks": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "group": {"type": "string"},
                        "description": {"type": "string"},
                        "tags": string_list.clone(),
                        "run_in_parallel": {"type": "boolean"},
                        "context": {"type": "object"},
                        "workloads": {
                            "type": "array",
                            "minItems": 1,
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string"},
                                    "description": {"type": "string"},
                                    "args": {"type": "object"},
                                    "runner": runner_schema(),
                                    "sla": {"type": "object"},
                                    "hooks": {"type": "array", "items": hook_schema()},
                                    "context": {"type": "object"}
                                },
                                "required": ["name", "runner"],
                                "additionalProperties": false
                            }
                        }
                    },
                    "required": ["title", "workloads"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["title", "subtasks"],
        "additionalProperties": false
    })
}

fn validators() -> Result<&'static [Validator; 2], TaskConfigError> {
    let compiled = VALIDATORS.get_or_init(|| {
        let v1 = Validator::new(&v1_schema())
            .map_err(|error| format!("failed to compile v1 task schema: {error}"))?;
        let v2 = Validator::new(&v2_schema())
            .map_err(|error| format!("failed to compile v2 task schema: {error}"))?;
        Ok([v1, v2])
    });

    compiled.as_ref().map_err(|message| TaskConfigError::Schema {
        message: message.clone(),
    })
}

/// Checks `document` against the schema of `version`, reporting every
/// violation with its JSON pointer.
pub fn validate_document(version: u64, document: &Value) -> Result<(), TaskConfigError> {
    let [v1, v2] = validators()?;
    let validator = match version {
        1 => v1,
        2 => v2,
        other => return Err(TaskConfigError::unsupported(other.to_string())),
    };

    let violations: Vec<String> = validator
        .iter_errors(document)
        .map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{path}: {error}")
            }
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(TaskConfigError::Schema {
            message: violations.join("\n"),
        })
    }
}
