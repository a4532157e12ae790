//! Status management utilities.
//!
//! Provides helpers for building and updating AIStore status conditions.

use crate::crd::{Condition, ConditionType};

/// Builder for managing conditions list
///
/// Seeded from the current conditions so that setting a condition to the
/// status it already has keeps its `lastTransitionTime`. Re-running a pass
/// that changes nothing therefore produces an identical list.
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create an empty condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from an existing conditions list
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set a condition of the given type
    pub fn condition(
        &mut self,
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::new(
            condition_type,
            status,
            reason,
            message,
            generation,
        ))
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.condition(ConditionType::Ready, ready, reason, message, generation)
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type).is_some_and(Condition::is_true)
}

/// Get the reason for a condition
pub fn get_condition_reason(conditions: &[Condition], condition_type: ConditionType) -> Option<&str> {
    find_condition(conditions, condition_type).map(|c| c.reason.as_str())
}

fn find_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    let name = condition_type.to_string();
    conditions.iter().find(|c| c.r#type == name)
}
