//! Faults raised while evaluating, and how they unwind.

use rustpython_parser::text_size::TextRange;

use super::object::Object;
use crate::error::ErrorKind;

/// Exception classes a snippet can raise and catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ExcKind {
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    KeyError,
    LookupError,
    ModuleNotFoundError,
    NameError,
    NotImplementedError,
    OverflowError,
    RecursionError,
    RuntimeError,
    StopIteration,
    TimeoutError,
    TypeError,
    ValueError,
    ZeroDivisionError,
}

impl ExcKind {
    pub const ALL: [ExcKind; 19] = [
        ExcKind::Exception,
        ExcKind::ArithmeticError,
        ExcKind::AssertionError,
        ExcKind::AttributeError,
        ExcKind::ImportError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::LookupError,
        ExcKind::ModuleNotFoundError,
        ExcKind::NameError,
        ExcKind::NotImplementedError,
        ExcKind::OverflowError,
        ExcKind::RecursionError,
        ExcKind::RuntimeError,
        ExcKind::StopIteration,
        ExcKind::TimeoutError,
        ExcKind::TypeError,
        ExcKind::ValueError,
        ExcKind::ZeroDivisionError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::ImportError => "ImportError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::LookupError => "LookupError",
            ExcKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExcKind::NameError => "NameError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::TimeoutError => "TimeoutError",
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    fn parent(self) -> Option<ExcKind> {
        match self {
            ExcKind::Exception => None,
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => Some(ExcKind::ArithmeticError),
            ExcKind::IndexError | ExcKind::KeyError => Some(ExcKind::LookupError),
            ExcKind::ModuleNotFoundError => Some(ExcKind::ImportError),
            ExcKind::RecursionError | ExcKind::NotImplementedError => Some(ExcKind::RuntimeError),
            _ => Some(ExcKind::Exception),
        }
    }

    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// The error kind reported when this exception escapes the snippet.
    pub fn error_kind(self) -> ErrorKind {
        match self {
            ExcKind::NameError => ErrorKind::UndefinedName,
            _ => ErrorKind::RuntimeFault,
        }
    }
}

/// A raised fault.
///
/// Catchable faults carry the exception object a handler binds; policy
/// violations, budget exhaustion and cancellation carry none and unwind
/// straight to the top.
#[derive(Debug)]
pub(crate) struct Fault {
    pub kind: ErrorKind,
    pub exception: Option<Object>,
    pub message: String,
    pub range: Option<TextRange>,
}

impl Fault {
    pub fn policy(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            exception: None,
            message: message.into(),
            range: None,
        }
    }

    /// An uncatchable runtime fault (limits, cancellation, internal).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::policy(ErrorKind::RuntimeFault, message)
    }

    pub fn raised(exception: Object) -> Self {
        let (kind, message) = match &exception {
            Object::Exception(exc) => {
                let text = exc.message();
                let message = if text.is_empty() {
                    exc.kind.name().to_string()
                } else if exc.kind == ExcKind::NameError {
                    text
                } else {
                    format!("{}: {}", exc.kind.name(), text)
                };
                (exc.kind.error_kind(), message)
            }
            other => (ErrorKind::RuntimeFault, other.repr()),
        };
        Self {
            kind,
            exception: Some(exception),
            message,
            range: None,
        }
    }

    /// `RecursionError`, with `during` naming what was being walked.
    pub fn recursion(during: &str) -> Self {
        Self::raised(Object::exception(
            ExcKind::RecursionError,
            format!("maximum recursion depth exceeded{during}"),
        ))
    }

    pub fn is_catchable(&self) -> bool {
        self.exception.is_some()
    }
}

/// Anything that stops normal evaluation.
#[derive(Debug)]
pub(crate) enum Unwind {
    Fault(Box<Fault>),
    /// A final-answer tool returned; evaluation ends with this value.
    FinalAnswer(Object),
}

impl Unwind {
    /// Attach a source range if the fault has none yet.
    pub fn at(mut self, range: TextRange) -> Self {
        if let Unwind::Fault(fault) = &mut self {
            if fault.range.is_none() {
                fault.range = Some(range);
            }
        }
        self
    }
}

impl From<Fault> for Unwind {
    fn from(fault: Fault) -> Self {
        Unwind::Fault(Box::new(fault))
    }
}

pub(crate) type EvalResult<T> = Result<T, Unwind>;

/// Statement completion.
#[derive(Debug)]
pub(crate) enum Flow {
    Next,
    Break,
    Continue,
    Return(Object),
}

/// A catchable exception of class `kind`.
pub(crate) fn exc(kind: ExcKind, message: impl Into<String>) -> Unwind {
    Fault::raised(Object::exception(kind, message.into())).into()
}

pub(crate) fn type_error(message: impl Into<String>) -> Unwind {
    exc(ExcKind::TypeError, message)
}

pub(crate) fn value_error(message: impl Into<String>) -> Unwind {
    exc(ExcKind::ValueError, message)
}

pub(crate) fn recursion_error(during: &str) -> Unwind {
    Fault::recursion(during).into()
}

pub(crate) fn policy(kind: ErrorKind, message: impl Into<String>) -> Unwind {
    Fault::policy(kind, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_hierarchy() {
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::ArithmeticError));
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::Exception));
        assert!(ExcKind::KeyError.is_subclass_of(ExcKind::LookupError));
        assert!(!ExcKind::KeyError.is_subclass_of(ExcKind::ValueError));
        assert!(ExcKind::ModuleNotFoundError.is_subclass_of(ExcKind::ImportError));
        assert_eq!(ExcKind::from_name("TypeError"), Some(ExcKind::TypeError));
        assert_eq!(ExcKind::from_name("BaseException"), None);
    }

    #[test]
    fn test_raised_fault_message() {
        let fault = Fault::raised(Object::exception(ExcKind::ValueError, "bad".into()));
        assert_eq!(fault.message, "ValueError: bad");
        assert_eq!(fault.kind, ErrorKind::RuntimeFault);
        assert!(fault.is_catchable());

        let fault = Fault::raised(Object::exception(ExcKind::NameError, "name 'x' is not defined".into()));
        assert_eq!(fault.kind, ErrorKind::UndefinedName);
        assert_eq!(fault.message, "name 'x' is not defined");

        assert!(!Fault::fatal("budget").is_catchable());
    }
}
