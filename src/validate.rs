//! Size and shape checks on job inputs and outputs.

use serde_json::Value;

use crate::config::Limits;
use crate::error::{HubError, Result};

/// Validate a submission before hashing. The job type must be a non-empty
/// string and the serialized parameters must fit the input cap.
pub fn validate_submission(job_type: &str, input_params: &Value, limits: &Limits) -> Result<()> {
    if job_type.is_empty() {
        return Err(HubError::Validation(
            "job_type must be a non-empty string".to_string(),
        ));
    }

    let size = serialized_size(input_params);
    if size > limits.max_input_bytes {
        return Err(HubError::Validation(format!(
            "input_params exceeds maximum size of {} bytes",
            limits.max_input_bytes
        )));
    }

    Ok(())
}

pub fn validate_output(output_data: &Value, limits: &Limits) -> Result<()> {
    let size = serialized_size(output_data);
    if size > limits.max_output_bytes {
        return Err(HubError::Validation(format!(
            "output_data exceeds maximum size of {} bytes",
            limits.max_output_bytes
        )));
    }
    Ok(())
}

pub fn validate_console(console_output: &str, limits: &Limits) -> Result<()> {
    if console_output.len() > limits.max_console_bytes {
        return Err(HubError::Validation(format!(
            "console_output exceeds maximum size of {} bytes",
            limits.max_console_bytes
        )));
    }
    Ok(())
}

pub fn validate_error_message(error_message: &str, limits: &Limits) -> Result<()> {
    if error_message.len() > limits.max_error_bytes {
        return Err(HubError::Validation(format!(
            "error_message exceeds maximum size of {} bytes",
            limits.max_error_bytes
        )));
    }
    Ok(())
}

fn serialized_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_job_type_rejected() {
        let limits = Limits::default();
        assert!(validate_submission("", &serde_json::json!({}), &limits).is_err());
        assert!(validate_submission("T", &serde_json::json!({}), &limits).is_ok());
    }

    #[test]
    fn input_at_limit_accepted_one_over_rejected() {
        let limits = Limits::default();

        // {"p":"<filler>"} serializes to filler.len() + 8 bytes.
        let overhead = 8;
        let filler = "x".repeat(limits.max_input_bytes - overhead);
        let params = serde_json::json!({ "p": filler });
        assert_eq!(
            serde_json::to_string(&params).unwrap().len(),
            limits.max_input_bytes
        );
        assert!(validate_submission("T", &params, &limits).is_ok());

        let filler = "x".repeat(limits.max_input_bytes - overhead + 1);
        let params = serde_json::json!({ "p": filler });
        assert!(validate_submission("T", &params, &limits).is_err());
    }

    #[test]
    fn console_boundary() {
        let limits = Limits::default();
        let console = "x".repeat(limits.max_console_bytes);
        assert!(validate_console(&console, &limits).is_ok());

        let console = "x".repeat(limits.max_console_bytes + 1);
        assert!(validate_console(&console, &limits).is_err());
    }

    #[test]
    fn error_message_boundary() {
        let limits = Limits::default();
        let message = "e".repeat(limits.max_error_bytes);
        assert!(validate_error_message(&message, &limits).is_ok());

        let message = "e".repeat(limits.max_error_bytes + 1);
        assert!(validate_error_message(&message, &limits).is_err());
    }
}
