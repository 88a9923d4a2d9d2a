use std::error::Error;
use std::fmt::{Display, Formatter};

pub type AtlasResult<T> = Result<T, AtlasError>;

pub const DIRECTORY_EXISTS: &str = "INPUT.DIRECTORY_EXISTS";
pub const MISSING_TABLE: &str = "INPUT.MISSING_TABLE";
pub const GRID_BOUNDS: &str = "INPUT.GRID_BOUNDS";
pub const FIXED_WIDTH_UNDERFLOW: &str = "INPUT.FIXED_WIDTH_UNDERFLOW";
pub const FIXED_WIDTH_OVERFLOW: &str = "INPUT.FIXED_WIDTH_OVERFLOW";
pub const MISSING_REFERENCE: &str = "INPUT.MISSING_REFERENCE";
pub const INCOMPATIBLE_TABLE: &str = "INPUT.INCOMPATIBLE_TABLE";
pub const INVALID_RESTART: &str = "INPUT.RESTART";
pub const RUN_TYPE_UNKNOWN: &str = "INPUT.RUN_TYPE_UNKNOWN";
pub const METADATA_FIELD: &str = "INPUT.METADATA";
pub const INVALID_SETTINGS: &str = "INPUT.SETTINGS";
pub const PARAMETER_MISMATCH: &str = "RUN.PARAMETER_MISMATCH";
pub const UNKNOWN_TERMINATION: &str = "RUN.UNKNOWN_TERMINATION";
pub const RUN_TIMEOUT: &str = "RUN.TIMEOUT";
pub const EXTERNAL_TOOL: &str = "RUN.EXTERNAL_TOOL";
pub const MISSING_OUTPUT: &str = "RUN.MISSING_OUTPUT";
pub const STAGE_ORDER: &str = "RUN.STAGE_ORDER";
pub const STAGE_OUTPUT: &str = "RUN.STAGE_OUTPUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtlasErrorCategory {
    Success,
    InputValidationError,
    IoSystemError,
    ComputationError,
    InternalError,
}

impl AtlasErrorCategory {
    pub const fn exit_placeholder(self) -> ExitPlaceholder {
        match self {
            Self::Success => ExitPlaceholder {
                exit_code: 0,
                rust_category: "Success",
                legacy_class: "SUCCESS",
            },
            Self::InputValidationError => ExitPlaceholder {
                exit_code: 2,
                rust_category: "InputValidationError",
                legacy_class: "INPUT_FATAL",
            },
            Self::IoSystemError => ExitPlaceholder {
                exit_code: 3,
                rust_category: "IoSystemError",
                legacy_class: "IO_FATAL",
            },
            Self::ComputationError => ExitPlaceholder {
                exit_code: 4,
                rust_category: "ComputationError",
                legacy_class: "RUN_FATAL",
            },
            Self::InternalError => ExitPlaceholder {
                exit_code: 5,
                rust_category: "InternalError",
                legacy_class: "SYS_FATAL",
            },
        }
    }

    pub const fn exit_code(self) -> i32 {
        self.exit_placeholder().exit_code
    }

    pub const fn rust_category(self) -> &'static str {
        self.exit_placeholder().rust_category
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPlaceholder {
    pub exit_code: i32,
    pub rust_category: &'static str,
    pub legacy_class: &'static str,
}

/// Error raised anywhere in the driver. The placeholder is a stable code that
/// callers match on; the message carries the values needed for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasError {
    category: AtlasErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl AtlasError {
    pub fn new(
        category: AtlasErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn input_validation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(
            AtlasErrorCategory::InputValidationError,
            placeholder,
            message,
        )
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(AtlasErrorCategory::IoSystemError, placeholder, message)
    }

    pub fn computation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(AtlasErrorCategory::ComputationError, placeholder, message)
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(AtlasErrorCategory::InternalError, placeholder, message)
    }

    /// Requested/received discrepancy reported by any validation pass.
    pub fn parameter_mismatch(
        name: impl Display,
        requested: impl Display,
        received: impl Display,
    ) -> Self {
        Self::computation(
            PARAMETER_MISMATCH,
            format!("{name} requested/received mismatch: {requested} vs {received}"),
        )
    }

    pub const fn category(&self) -> AtlasErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn is(&self, placeholder: &str) -> bool {
        self.placeholder == placeholder
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.placeholder, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for AtlasError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.rust_category(),
            self.placeholder,
            self.message
        )
    }
}

impl Error for AtlasError {}

#[cfg(test)]
mod tests {
    use super::{AtlasError, AtlasErrorCategory, PARAMETER_MISMATCH};

    #[test]
    fn exit_mapping_is_stable() {
        let cases = [
            (AtlasErrorCategory::Success, 0, "Success", "SUCCESS"),
            (
                AtlasErrorCategory::InputValidationError,
                2,
                "InputValidationError",
                "INPUT_FATAL",
            ),
            (
                AtlasErrorCategory::IoSystemError,
                3,
                "IoSystemError",
                "IO_FATAL",
            ),
            (
                AtlasErrorCategory::ComputationError,
                4,
                "ComputationError",
                "RUN_FATAL",
            ),
            (
                AtlasErrorCategory::InternalError,
                5,
                "InternalError",
                "SYS_FATAL",
            ),
        ];

        for (category, exit_code, rust_category, legacy_class) in cases {
            let placeholder = category.exit_placeholder();
            assert_eq!(placeholder.exit_code, exit_code);
            assert_eq!(placeholder.rust_category, rust_category);
            assert_eq!(placeholder.legacy_class, legacy_class);
        }
    }

    #[test]
    fn fatal_error_renders_diagnostic_lines() {
        let error = AtlasError::input_validation(
            "INPUT.DIRECTORY_EXISTS",
            "directory 'run_1' already exists",
        );

        assert_eq!(error.exit_code(), 2);
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [INPUT.DIRECTORY_EXISTS] directory 'run_1' already exists"
        );
        assert_eq!(
            error.fatal_exit_line().as_deref(),
            Some("FATAL EXIT CODE: 2")
        );
    }

    #[test]
    fn parameter_mismatch_names_both_values() {
        let error = AtlasError::parameter_mismatch("Teff", 5770.0, 5700.0);
        assert!(error.is(PARAMETER_MISMATCH));
        assert_eq!(error.category(), AtlasErrorCategory::ComputationError);
        assert_eq!(
            error.message(),
            "Teff requested/received mismatch: 5770 vs 5700"
        );
    }
}
