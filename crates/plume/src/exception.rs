//! Runtime error taxonomy and propagation.
//!
//! Every user-visible failure is a `RunError`: an exception kind plus a
//! message, accumulating the frame chain as it unwinds to the driver. The
//! interpreter loop installs no handlers; promise callbacks and the event
//! loop catch errors at their boundaries (see `event_loop`).

use std::fmt::{self, Write};

use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Exception kinds surfaced by the runtime.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and
/// `Into<&'static str>` implementations. The string representation matches
/// the variant name exactly (e.g., `ValueError` -> "ValueError").
///
/// `StopIteration` is deliberately absent: iterator exhaustion is a sentinel
/// value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    /// Callable-not-callable, operator-unsupported, wrong argument kind.
    TypeError,
    /// LEGB lookup miss.
    NameError,
    /// Attribute lookup miss after the MRO walk.
    AttributeError,
    /// Sequence index out of range, missing dict key.
    IndexError,
    /// Invalid literal, division by zero, negative shift or exponent.
    ValueError,
    /// Malformed binary input.
    SerializationError,
    /// VM invariant violation (bad stack depth, bad opcode).
    InternalError,
}

impl ExcType {
    /// Builds a `TypeError` with the given message.
    pub fn type_error(message: impl Into<String>) -> RunError {
        RunError::new(Self::TypeError, message)
    }

    /// Builds a `NameError` for an undefined name, with the conventional
    /// message shape.
    pub fn name_error(name: &str) -> RunError {
        RunError::new(Self::NameError, format!("name '{name}' is not defined"))
    }

    /// Builds an `AttributeError` for a failed attribute lookup.
    pub fn attribute_error(type_name: &str, attr: &str) -> RunError {
        RunError::new(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    /// Builds an `IndexError` with the given message.
    pub fn index_error(message: impl Into<String>) -> RunError {
        RunError::new(Self::IndexError, message)
    }

    /// Builds a `ValueError` with the given message.
    pub fn value_error(message: impl Into<String>) -> RunError {
        RunError::new(Self::ValueError, message)
    }

    /// Builds a `SerializationError` with the given message.
    pub fn serialization_error(message: impl Into<String>) -> RunError {
        RunError::new(Self::SerializationError, message)
    }

    /// Builds an `InternalError` with the given message.
    pub fn internal(message: impl Into<String>) -> RunError {
        RunError::new(Self::InternalError, message)
    }
}

/// One entry of the unwound frame chain, recorded as an error propagates
/// out of `eval_frame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Function name, `<module>` for module-entry frames.
    pub function: String,
    /// Program counter at the failing instruction.
    pub pc: usize,
}

/// A runtime error carrying its kind, message, and the frame chain from the
/// failing frame outward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    exc_type: ExcType,
    message: String,
    frames: Vec<TraceFrame>,
}

impl RunError {
    /// Creates an error with an empty frame chain.
    pub fn new(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Returns the exception kind.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// Returns the bare message, without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the frame chain, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    /// Appends a frame as the error unwinds one call level.
    pub fn push_frame(&mut self, function: impl Into<String>, pc: usize) {
        self.frames.push(TraceFrame {
            function: function.into(),
            pc,
        });
    }

    /// Renders the error with its frame chain for the driver, e.g.
    ///
    /// ```text
    /// TypeError: 'int' object is not callable
    ///   in f at instruction 4
    ///   in <module> at instruction 12
    /// ```
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{self}");
        for frame in &self.frames {
            let _ = write!(out, "\n  in {} at instruction {}", frame.function, frame.pc);
        }
        out
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exc_type, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_frame_chain_innermost_first() {
        let mut err = ExcType::type_error("'int' object is not callable");
        err.push_frame("f", 4);
        err.push_frame("<module>", 12);
        assert_eq!(
            err.render(),
            "TypeError: 'int' object is not callable\n  in f at instruction 4\n  in <module> at instruction 12"
        );
    }

    #[test]
    fn exc_type_display_matches_variant_name() {
        assert_eq!(ExcType::NameError.to_string(), "NameError");
        assert_eq!(ExcType::SerializationError.to_string(), "SerializationError");
    }
}
