use crate::navigation::types::{NavigationState, Transition};
use crate::session::types::SessionId;
use dashmap::DashMap;
use tracing::debug;

/// Bounded per-session navigation history stacks.
pub struct NavigationHistory {
    stacks: DashMap<SessionId, Vec<NavigationState>>,
    limit: usize,
}

impl NavigationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            stacks: DashMap::new(),
            limit: limit.max(2),
        }
    }

    /// Push a navigation entry, evicting the oldest past the bound.
    pub fn push_history(&self, state: NavigationState) {
        let mut stack = self.stacks.entry(state.session_id).or_default();
        stack.push(state);
        if stack.len() > self.limit {
            let overflow = stack.len() - self.limit;
            stack.drain(..overflow);
        }
    }

    /// Pop the current entry and return the new top as a back transition.
    /// `None` when fewer than two entries exist.
    pub fn handle_back(&self, session_id: SessionId) -> Option<NavigationState> {
        let mut stack = self.stacks.get_mut(&session_id)?;
        if stack.len() < 2 {
            return None;
        }
        stack.pop();
        let mut top = stack.last()?.clone();
        top.transition = Transition::Back;
        debug!("Session {} navigated back to {:?}", session_id, top.step);
        Some(top)
    }

    pub fn depth(&self, session_id: SessionId) -> usize {
        self.stacks.get(&session_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for NavigationHistory {
    fn default() -> Self {
        Self::new(50)
    }
}
