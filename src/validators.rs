// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Parameter validation for control commands.
//!
//! Validators accept the raw JSON `params` object, check type and
//! business rules, and return the normalised value. Error messages are
//! descriptive enough to go back to the client verbatim.

use serde_json::{Map, Value};

use crate::error::{ProcessorError, Result};

fn required<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    params
        .get(key)
        .ok_or_else(|| ProcessorError::CommandValidation(format!("Missing parameter '{key}'")))
}

/// `model_id` for `change_model`: non-empty string, trimmed.
pub fn model_id(params: &Map<String, Value>) -> Result<String> {
    let value = required(params, "model_id")?;
    let Value::String(raw) = value else {
        return Err(ProcessorError::CommandValidation(format!(
            "Invalid model_id: must be string, got {value}"
        )));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProcessorError::CommandValidation(
            "Invalid model_id: must be non-empty string".into(),
        ));
    }
    Ok(trimmed.to_string())
}

/// `max_fps` for `set_fps`: numeric (number or numeric string), > 0.
pub fn max_fps(params: &Map<String, Value>) -> Result<f64> {
    let value = required(params, "max_fps")?;
    let fps = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        ProcessorError::CommandValidation(format!("Invalid max_fps: must be numeric, got {value}"))
    })?;
    if fps <= 0.0 {
        return Err(ProcessorError::CommandValidation(format!(
            "Invalid max_fps: must be > 0, got {fps}"
        )));
    }
    Ok(fps)
}

/// `source_id` for `add_stream` / `remove_stream`: non-negative integer
/// (number or numeric string).
pub fn source_id(params: &Map<String, Value>) -> Result<u32> {
    let value = required(params, "source_id")?;
    let id = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        ProcessorError::CommandValidation(format!(
            "Invalid source_id: must be numeric, got {value}"
        ))
    })?;
    if id < 0 {
        return Err(ProcessorError::CommandValidation(format!(
            "Invalid source_id: cannot be negative, got {id}"
        )));
    }
    Ok(id as u32)
}

/// `new_instance_id` for `rename_instance`: non-empty string, trimmed.
pub fn new_instance_id(params: &Map<String, Value>) -> Result<String> {
    let value = required(params, "new_instance_id")?;
    let Value::String(raw) = value else {
        return Err(ProcessorError::CommandValidation(format!(
            "Invalid new_instance_id: must be string, got {value}"
        )));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProcessorError::CommandValidation(
            "Invalid new_instance_id: must be non-empty string".into(),
        ));
    }
    Ok(trimmed.to_string())
}
