//! Typed routing predicates over context fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::{ContextError, Snapshot};

/// Boolean expression evaluated against a snapshot.
///
/// Built in code at configuration time; there is no expression parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Condition {
    /// Always true. Used as an explicit default.
    Always,
    /// `snapshot[key] == value`.
    Eq { key: String, value: Value },
    /// True when every operand is true. Evaluates left to right and stops at the first false.
    And { all: Vec<Condition> },
}

impl Condition {
    pub fn eq(key: &str, value: impl Into<Value>) -> Self {
        Condition::Eq {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn and(all: Vec<Condition>) -> Self {
        Condition::And { all }
    }

    /// Evaluate against `snapshot`. Reading an absent key is an error, not `false`.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Result<bool, ContextError> {
        match self {
            Condition::Always => Ok(true),
            Condition::Eq { key, value } => Ok(snapshot.get(key)? == value),
            Condition::And { all } => {
                for condition in all {
                    if !condition.evaluate(snapshot)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{ContextUpdate, keys};
    use crate::test_support::seed_snapshot;

    #[test]
    fn eq_compares_json_values() {
        let snapshot = seed_snapshot(1);
        assert_eq!(
            Condition::eq(keys::CURRENT_STAGE, "planning").evaluate(&snapshot),
            Ok(true)
        );
        assert_eq!(
            Condition::eq(keys::CURRENT_STAGE, "drafting").evaluate(&snapshot),
            Ok(false)
        );
        assert_eq!(
            Condition::eq(keys::LOOP_STARTED, true).evaluate(&snapshot),
            Ok(true)
        );
    }

    #[test]
    fn and_requires_every_operand() {
        let snapshot = seed_snapshot(1)
            .apply(&ContextUpdate::new().set(keys::CURRENT_STAGE, "drafting"));
        let both = Condition::and(vec![
            Condition::eq(keys::LOOP_STARTED, true),
            Condition::eq(keys::CURRENT_STAGE, "drafting"),
        ]);
        assert_eq!(both.evaluate(&snapshot), Ok(true));

        let one_false = Condition::and(vec![
            Condition::eq(keys::LOOP_STARTED, false),
            Condition::eq(keys::CURRENT_STAGE, "drafting"),
        ]);
        assert_eq!(one_false.evaluate(&snapshot), Ok(false));
    }

    #[test]
    fn missing_key_is_an_error() {
        let snapshot = seed_snapshot(1);
        let err = Condition::eq("ghost", 1).evaluate(&snapshot).unwrap_err();
        assert_eq!(
            err,
            ContextError::MissingKey {
                key: "ghost".to_string()
            }
        );
    }

    #[test]
    fn serializes_as_tagged_tree() {
        let condition = Condition::and(vec![Condition::eq("a", 1), Condition::Always]);
        let json = serde_json::to_value(&condition).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "op": "and",
                "all": [{"op": "eq", "key": "a", "value": 1}, {"op": "always"}]
            })
        );
    }
}
