//! Conditional transitions.
//!
//! A conditional node lists named conditions; what a name means is decided
//! by an injected [`ConditionEvaluator`]. Branches are tried in order and the
//! first one that holds wins.

use tracing::debug;

use super::definition::{DefinitionError, Target, Transition};
use super::state::{RunInputs, StepOutputs};

/// What an evaluator can see when deciding a condition.
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    /// Condition name from the definition.
    pub condition: &'a str,
    /// Step whose transition is being decided.
    pub step_id: &'a str,
    /// Output that step just produced.
    pub last_output: &'a str,
    /// Every output so far.
    pub outputs: &'a StepOutputs,
    /// Run inputs.
    pub inputs: &'a RunInputs,
    /// Transitions taken so far in this run.
    pub transitions: u32,
}

/// Decides whether a named condition holds.
pub trait ConditionEvaluator: Send + Sync {
    /// Returns `true` if the condition holds.
    fn evaluate(&self, context: &ConditionContext<'_>) -> bool;
}

/// Treats a condition as satisfied when the last output contains its name
/// as a whole word sequence, ignoring case. `needs_revision` and
/// `needs revision` both match "Needs revision."
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordEvaluator;

impl ConditionEvaluator for KeywordEvaluator {
    fn evaluate(&self, context: &ConditionContext<'_>) -> bool {
        let wanted = words(context.condition);
        if wanted.is_empty() {
            return false;
        }
        words(context.last_output).windows(wanted.len()).any(|window| window == wanted.as_slice())
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Adapts a closure into an evaluator.
pub struct FnEvaluator<F>(F);

impl<F> FnEvaluator<F>
where
    F: Fn(&ConditionContext<'_>) -> bool + Send + Sync,
{
    /// Wraps `predicate`.
    pub fn new(predicate: F) -> Self {
        Self(predicate)
    }
}

impl<F> ConditionEvaluator for FnEvaluator<F>
where
    F: Fn(&ConditionContext<'_>) -> bool + Send + Sync,
{
    fn evaluate(&self, context: &ConditionContext<'_>) -> bool {
        (self.0)(context)
    }
}

/// Picks the successor of `step_id`.
///
/// `base` carries everything but the condition name, which is filled in per
/// branch.
///
/// # Errors
/// Returns `DefinitionError::NoMatchingTransition` when no condition holds
/// and the node has no default.
pub fn next_target(
    transition: &Transition,
    base: ConditionContext<'_>,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Target, DefinitionError> {
    match transition {
        Transition::Next(target) => Ok(target.clone()),
        Transition::Conditional { branches, default } => {
            for (condition, target) in branches {
                let context = ConditionContext { condition: condition.as_str(), ..base };
                if evaluator.evaluate(&context) {
                    debug!(step_id = %base.step_id, condition = %condition, target = %target, "Condition matched");
                    return Ok(target.clone());
                }
            }
            default.clone().ok_or_else(|| DefinitionError::NoMatchingTransition(base.step_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(
        condition: &'a str,
        last_output: &'a str,
        outputs: &'a StepOutputs,
        inputs: &'a RunInputs,
    ) -> ConditionContext<'a> {
        ConditionContext { condition, step_id: "qa", last_output, outputs, inputs, transitions: 0 }
    }

    #[test]
    fn test_keyword_evaluator_matches_whole_words() {
        let (outputs, inputs) = (StepOutputs::new(), RunInputs::new());
        let evaluator = KeywordEvaluator;

        assert!(evaluator.evaluate(&context("approved", "Status: APPROVED.", &outputs, &inputs)));
        assert!(evaluator.evaluate(&context("needs_revision", "This needs revision now", &outputs, &inputs)));
        assert!(!evaluator.evaluate(&context("approved", "unapproved draft", &outputs, &inputs)));
        assert!(!evaluator.evaluate(&context("", "anything", &outputs, &inputs)));
    }

    #[test]
    fn test_first_matching_branch_wins() {
        let (outputs, inputs) = (StepOutputs::new(), RunInputs::new());
        let transition = Transition::Conditional {
            branches: vec![
                ("approved".to_string(), Target::End),
                ("revise".to_string(), Target::Step("writer".to_string())),
            ],
            default: None,
        };
        let evaluator = FnEvaluator::new(|ctx: &ConditionContext<'_>| ctx.condition != "approved");

        let target = next_target(&transition, context("", "x", &outputs, &inputs), &evaluator).unwrap();
        assert_eq!(target, Target::Step("writer".to_string()));
    }

    #[test]
    fn test_falls_back_to_default_or_fails() {
        let (outputs, inputs) = (StepOutputs::new(), RunInputs::new());
        let never = FnEvaluator::new(|_: &ConditionContext<'_>| false);
        let with_default = Transition::Conditional {
            branches: vec![("approved".to_string(), Target::End)],
            default: Some(Target::Step("writer".to_string())),
        };
        let target = next_target(&with_default, context("", "x", &outputs, &inputs), &never).unwrap();
        assert_eq!(target, Target::Step("writer".to_string()));

        let without_default =
            Transition::Conditional { branches: vec![("approved".to_string(), Target::End)], default: None };
        let err = next_target(&without_default, context("", "x", &outputs, &inputs), &never).unwrap_err();
        assert!(matches!(err, DefinitionError::NoMatchingTransition(ref step) if step == "qa"));
    }
}
