use std::fmt::{Display, Formatter};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::value::Value;

pub(crate) const GENERIC_MESSAGE: &str = "Validation error";

/// Failure raised by a custom async validator. Treated as a failing rule
/// whose message is the fault's message, never as a fatal error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationFault {
    message: Arc<str>,
}

impl ValidationFault {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &Arc<str> {
        &self.message
    }
}

impl Display for ValidationFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationFault {}

impl From<&str> for ValidationFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ValidationFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

pub(crate) type SyncValidatorFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Async validators receive the value under test and an explicit snapshot of
/// the owning form's full value tree. Cross-field rules read that snapshot;
/// they never close over live form state.
pub(crate) type AsyncValidatorFn =
    Arc<dyn Fn(Value, Value) -> BoxFuture<'static, Result<bool, ValidationFault>> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct SyncRule {
    pub(crate) validator: SyncValidatorFn,
    pub(crate) message: Option<Arc<str>>,
}

#[derive(Clone)]
pub(crate) struct AsyncRule {
    pub(crate) validator: AsyncValidatorFn,
    pub(crate) message: Option<Arc<str>>,
}

/// Ordered rule phases for one leaf. Declaration order is evaluation order;
/// the first failing rule short-circuits the rest of its phase.
#[derive(Clone, Default)]
pub(crate) struct RuleSet {
    sync: Vec<SyncRule>,
    r#async: Vec<AsyncRule>,
}

impl RuleSet {
    pub(crate) fn with_sync(&self, rule: SyncRule) -> Self {
        let mut next = self.clone();
        next.sync.push(rule);
        next
    }

    pub(crate) fn with_async(&self, rule: AsyncRule) -> Self {
        let mut next = self.clone();
        next.r#async.push(rule);
        next
    }

    pub(crate) fn has_async(&self) -> bool {
        !self.r#async.is_empty()
    }

    /// First failing synchronous rule's message, else `None`.
    pub(crate) fn run_sync(&self, value: &Value) -> Option<Arc<str>> {
        for rule in &self.sync {
            if !(rule.validator)(value) {
                return Some(fail_message(rule.message.as_ref()));
            }
        }
        None
    }

    /// Asynchronous phase. The orchestrator only enters this phase after
    /// `run_sync` passed; the rules themselves make no such check.
    pub(crate) async fn run_async(&self, value: &Value, state: &Value) -> Option<Arc<str>> {
        for rule in &self.r#async {
            match (rule.validator)(value.clone(), state.clone()).await {
                Ok(true) => {}
                Ok(false) => return Some(fail_message(rule.message.as_ref())),
                Err(fault) => return Some(fault.message().clone()),
            }
        }
        None
    }
}

fn fail_message(message: Option<&Arc<str>>) -> Arc<str> {
    message.cloned().unwrap_or_else(|| GENERIC_MESSAGE.into())
}

#[cfg(test)]
mod rule_tests {
    use super::*;
    use futures::executor::block_on;

    fn sync_rule(pass: bool, message: &str) -> SyncRule {
        SyncRule {
            validator: Arc::new(move |_| pass),
            message: Some(message.into()),
        }
    }

    #[test]
    fn first_failing_sync_rule_wins() {
        let rules = RuleSet::default()
            .with_sync(sync_rule(true, "first"))
            .with_sync(sync_rule(false, "second"))
            .with_sync(sync_rule(false, "third"));
        assert_eq!(rules.run_sync(&Value::Null).as_deref(), Some("second"));
    }

    #[test]
    fn async_fault_message_becomes_the_error() {
        let validator: AsyncValidatorFn =
            Arc::new(|_, _| Box::pin(async { Err(ValidationFault::new("backend down")) }));
        let rules = RuleSet::default().with_async(AsyncRule {
            validator,
            message: Some("unused".into()),
        });
        let result = block_on(rules.run_async(&Value::Null, &Value::record()));
        assert_eq!(result.as_deref(), Some("backend down"));
    }

    #[test]
    fn missing_message_falls_back_to_generic() {
        let rules = RuleSet::default().with_sync(SyncRule {
            validator: Arc::new(|_| false),
            message: None,
        });
        assert_eq!(rules.run_sync(&Value::Null).as_deref(), Some(GENERIC_MESSAGE));
    }
}
