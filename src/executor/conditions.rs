use super::ExtensionContext;
use crate::{
    config::{keys, ConfigurationParameters},
    errors::TestError,
    extension::{CapabilityKind, ConditionResult},
};
use glob::Pattern;
use std::panic::{self, AssertUnwindSafe};

/// Evaluates the execution conditions registered for a node.
pub struct ConditionEvaluator {
    /// Conditions whose names match one of these are never evaluated.
    deactivated: Vec<Pattern>,
}

impl ConditionEvaluator {
    pub fn new(configuration: &dyn ConfigurationParameters) -> Self {
        let deactivated = configuration
            .get(keys::DEACTIVATE_CONDITIONS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .filter_map(|p| match Pattern::new(p) {
                        Ok(pattern) => Some(pattern),
                        Err(err) => {
                            tracing::warn!(pattern = p, "ignoring invalid deactivation pattern: {}", err);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        ConditionEvaluator { deactivated }
    }

    fn is_deactivated(&self, name: &str) -> bool {
        self.deactivated.iter().any(|p| p.matches(name))
    }

    /// Ask every active condition in registry order; the first disabled
    /// verdict wins. Errors and panics raised by a condition become
    /// configuration errors naming it.
    pub fn evaluate(&self, context: &ExtensionContext) -> Result<ConditionResult, TestError> {
        for extension in context.registry().extensions(CapabilityKind::Condition) {
            let condition = match extension.as_condition() {
                Some(condition) => condition,
                None => continue,
            };
            if self.is_deactivated(extension.name()) {
                tracing::trace!(condition = extension.name(), "condition deactivated");
                continue;
            }
            let verdict = panic::catch_unwind(AssertUnwindSafe(|| condition.evaluate(context)))
                .unwrap_or_else(|payload| Err(TestError::from_panic(payload)))
                .map_err(|err| {
                    TestError::configuration(format!(
                        "Failed to evaluate condition [{}]: {}",
                        extension.name(),
                        err
                    ))
                })?;
            tracing::trace!(
                condition = extension.name(),
                id = %context.unique_id(),
                disabled = verdict.is_disabled(),
                "evaluated condition"
            );
            if verdict.is_disabled() {
                return Ok(verdict);
            }
        }
        Ok(ConditionResult::enabled("No disabling condition found"))
    }
}
