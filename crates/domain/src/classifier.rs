//! Call classification.
//!
//! Derives the `(service, method)` pair of a call from the framework-supplied
//! call path (`"/<service>/<method>"`). Classification never fails the call:
//! anything that cannot be parsed becomes `unknown/unknown` and is logged.

use crate::record::CallIdentity;
use thiserror::Error;
use tracing::warn;

/// View of a call's invocation context that the classifier understands.
pub trait CallContext {
    /// Raw call path, e.g. `"/Inventory/GetItem"`, if the context exposes one
    fn call_path(&self) -> Option<&str>;

    /// Whether the framework has cancelled this call
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl CallContext for str {
    fn call_path(&self) -> Option<&str> {
        Some(self)
    }
}

impl CallContext for String {
    fn call_path(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl<T: CallContext> CallContext for Option<T> {
    fn call_path(&self) -> Option<&str> {
        self.as_ref().and_then(CallContext::call_path)
    }

    fn is_cancelled(&self) -> bool {
        self.as_ref().map(CallContext::is_cancelled).unwrap_or(false)
    }
}

/// Reasons a call could not be classified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    /// The context does not carry a call path
    #[error("call context does not expose a call path")]
    MissingCallPath,

    /// The path has no service segment
    #[error("call path '{0}' has no service segment")]
    MissingService(String),

    /// The path has a service but no method
    #[error("call path '{0}' has no method segment")]
    MissingMethod(String),
}

/// Parse a `"/<service>/<method>"` call path.
///
/// The first non-empty segment is the service; everything after it, with
/// surrounding slashes removed, is the method.
pub fn parse_call_path(path: &str) -> Result<CallIdentity, ClassificationError> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(ClassificationError::MissingService(path.to_string()));
    }

    let (service, rest) = trimmed
        .split_once('/')
        .ok_or_else(|| ClassificationError::MissingMethod(path.to_string()))?;

    let method = rest.trim_matches('/');
    if method.is_empty() {
        return Err(ClassificationError::MissingMethod(path.to_string()));
    }

    Ok(CallIdentity::new(service, method))
}

/// Extracts `(service, method)` identifiers from call contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallClassifier;

impl CallClassifier {
    /// Create a classifier
    pub fn new() -> Self {
        Self
    }

    /// Classify a call, falling back to `unknown/unknown` with a warning.
    pub fn classify<C: CallContext + ?Sized>(&self, context: &C) -> CallIdentity {
        match self.try_classify(context) {
            Ok(identity) => identity,
            Err(error) => {
                warn!(error = %error, "Cannot derive the service name and method");
                CallIdentity::unknown()
            }
        }
    }

    /// Classify a call, reporting why it failed instead of falling back.
    pub fn try_classify<C: CallContext + ?Sized>(
        &self,
        context: &C,
    ) -> Result<CallIdentity, ClassificationError> {
        let path = context
            .call_path()
            .ok_or(ClassificationError::MissingCallPath)?;
        parse_call_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct NoPath;

    impl CallContext for NoPath {
        fn call_path(&self) -> Option<&str> {
            None
        }
    }

    #[test]
    fn test_parse_standard_path() {
        let identity = parse_call_path("/Inventory/GetItem").unwrap();
        assert_eq!(identity.service(), "Inventory");
        assert_eq!(identity.method(), "GetItem");
    }

    #[test]
    fn test_parse_package_qualified_service() {
        let identity = parse_call_path("/grpc.health.v1.Health/Check").unwrap();
        assert_eq!(identity.service(), "grpc.health.v1.Health");
        assert_eq!(identity.method(), "Check");
    }

    #[test]
    fn test_parse_keeps_remainder_as_method() {
        let identity = parse_call_path("//Inventory/items/GetItem/").unwrap();
        assert_eq!(identity.service(), "Inventory");
        assert_eq!(identity.method(), "items/GetItem");
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_call_path(""),
            Err(ClassificationError::MissingService(_))
        ));
        assert!(matches!(
            parse_call_path("///"),
            Err(ClassificationError::MissingService(_))
        ));
        assert!(matches!(
            parse_call_path("/Inventory"),
            Err(ClassificationError::MissingMethod(_))
        ));
        assert!(matches!(
            parse_call_path("/Inventory/"),
            Err(ClassificationError::MissingMethod(_))
        ));
    }

    #[test]
    fn test_classify_falls_back_to_unknown() {
        let classifier = CallClassifier::new();
        assert!(classifier.classify(&NoPath).is_unknown());
        assert!(classifier.classify("not-a-path").is_unknown());
        assert_eq!(
            classifier.try_classify(&NoPath),
            Err(ClassificationError::MissingCallPath)
        );
    }

    #[test]
    fn test_option_context() {
        let classifier = CallClassifier::new();
        let missing: Option<String> = None;
        assert!(classifier.classify(&missing).is_unknown());

        let present = Some("/Inventory/GetItem".to_string());
        assert_eq!(classifier.classify(&present).method(), "GetItem");
    }

    proptest! {
        #[test]
        fn prop_well_formed_paths_round_trip(
            service in "[A-Za-z][A-Za-z0-9_.]{0,20}",
            method in "[A-Za-z][A-Za-z0-9_]{0,20}",
        ) {
            let path = format!("/{}/{}", service, method);
            let identity = parse_call_path(&path).unwrap();
            prop_assert_eq!(identity.service(), service.as_str());
            prop_assert_eq!(identity.method(), method.as_str());
        }

        #[test]
        fn prop_classify_never_yields_empty_names(path in ".{0,40}") {
            let identity = CallClassifier::new().classify(path.as_str());
            prop_assert!(!identity.service().is_empty());
            prop_assert!(!identity.method().is_empty());
        }
    }
}
