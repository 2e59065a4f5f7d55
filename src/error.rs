use thiserror::Error;

/// Errors raised while loading reference data, building a report and
/// assembling the output workbook.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Reference data unavailable: {0}")]
    ReferenceData(String),

    #[error("Missing required fields for {service_type}: {}", .missing.join(", "))]
    Validation {
        service_type: String,
        missing: Vec<&'static str>,
    },

    #[error("Invalid image for {slot}: {reason}")]
    Asset { slot: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid report form: {0}")]
    Form(String),

    #[error("Failed to write report: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;
