use thiserror::Error;

use crate::ir::Function;
use crate::target::Target;

/// Fatal conditions raised while lowering, dispatching or aggregating.
///
/// None of these are transient: each one points at a pipeline-ordering or
/// configuration defect upstream of the failing call.
#[derive(Debug, Clone, Error)]
pub enum LowerError {
    #[error("external function has no global symbol attached:\n{function}")]
    MissingGlobalSymbol { function: String },

    #[error("failed to find the codegen tool `{name}` required by toolchain `{compiler}`")]
    MissingExternalCodegen { name: String, compiler: String },

    #[error(
        "no target is specified for device `{device}`: device type {code} was not found in the \
         target map (available: {available})"
    )]
    UnknownDeviceType {
        device: String,
        code: i32,
        available: String,
    },

    #[error("`{annotation}` must be set on `{function}` by the lowering pass")]
    MissingAnnotation {
        annotation: &'static str,
        function: String,
    },

    #[error("call inside `{function}` is not constrained to a device with a target")]
    UnconstrainedDevice { function: String },

    #[error("duplicate bindings for `{name}`")]
    DuplicateBinding { name: String },

    #[error("global `{name}` is not defined in the module")]
    UnknownGlobal { name: String },

    #[error("operator `{op}` has no registered lowering")]
    UnknownOp { op: String },

    #[error("malformed primitive function: {message}")]
    MalformedPrimitive { message: String },

    #[error("device copy expects exactly one argument, found {found}")]
    InvalidDeviceCopy { found: usize },

    #[error("runtime unit built for `{target}` does not export `{symbol}`")]
    MissingSymbol { symbol: String, target: String },

    #[error("external toolchain `{compiler}` failed: {message}")]
    Toolchain { compiler: String, message: String },

    #[error("code generation failed: {message}")]
    Codegen { message: String },

    #[error("failed to lower function for target `{target}`: {source}\n{function}")]
    Lowering {
        function: String,
        target: String,
        #[source]
        source: Box<LowerError>,
    },
}

impl LowerError {
    pub fn malformed(message: impl Into<String>) -> Self {
        LowerError::MalformedPrimitive {
            message: message.into(),
        }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        LowerError::Codegen {
            message: message.into(),
        }
    }

    /// Attaches the offending function and active target to `err`.
    pub fn lowering(function: &Function, target: &Target, err: LowerError) -> Self {
        LowerError::Lowering {
            function: function.to_string(),
            target: target.to_string(),
            source: Box::new(err),
        }
    }
}

/// Convenience alias for results returned by lowering routines.
pub type LowerResult<T> = Result<T, LowerError>;
