//! Cost/context budget enforcement, applied pre-flight (before the model is
//! invoked) and post-flight (after the turn's usage is known) per the turn loop.

use crate::error::LlmError;

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Budget {
    pub total_cost: f64,
    pub last_input_tokens: u64,
    pub cost_limit: Option<f64>,
    pub context_limit: Option<u64>,
}

impl Budget {
    /// Step 2 of the turn loop: both checks happen before the model is invoked.
    pub(super) fn preflight(&self) -> Result<(), LlmError> {
        if let Some(limit) = self.cost_limit
            && self.total_cost >= limit
        {
            return Err(LlmError::CostLimitExceeded { spent: self.total_cost, limit });
        }
        if let Some(limit) = self.context_limit
            && self.last_input_tokens >= limit
        {
            return Err(LlmError::ContextLimitExceeded { last_input: self.last_input_tokens, limit });
        }
        Ok(())
    }

    /// Step 6's post-flight check: only fatal when there is more work left to do
    /// (pending tool calls or a non-empty queue) — a final non-tool response is
    /// never truncated by a late budget overrun.
    pub(super) fn postflight(&self, has_more_actions: bool) -> Result<(), LlmError> {
        if !has_more_actions {
            return Ok(());
        }
        if let Some(limit) = self.cost_limit
            && self.total_cost >= limit
        {
            return Err(LlmError::CostLimitExceeded { spent: self.total_cost, limit });
        }
        if let Some(limit) = self.context_limit
            && self.last_input_tokens >= limit
        {
            return Err(LlmError::ContextLimitExceeded { last_input: self.last_input_tokens, limit });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_triggers_when_already_over_cost_limit() {
        let budget = Budget { total_cost: 1.0, cost_limit: Some(1.0), ..Default::default() };
        assert!(matches!(budget.preflight(), Err(LlmError::CostLimitExceeded { .. })));
    }

    #[test]
    fn preflight_passes_under_limits() {
        let budget = Budget { total_cost: 0.1, cost_limit: Some(1.0), last_input_tokens: 10, context_limit: Some(100), ..Default::default() };
        assert!(budget.preflight().is_ok());
    }

    #[test]
    fn postflight_ignores_overrun_when_no_more_actions() {
        let budget = Budget { total_cost: 5.0, cost_limit: Some(1.0), ..Default::default() };
        assert!(budget.postflight(false).is_ok());
    }

    #[test]
    fn postflight_raises_when_overrun_and_more_actions_pending() {
        let budget = Budget { total_cost: 5.0, cost_limit: Some(1.0), ..Default::default() };
        assert!(matches!(budget.postflight(true), Err(LlmError::CostLimitExceeded { .. })));
    }
}
