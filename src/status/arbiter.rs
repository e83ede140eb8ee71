use super::channel::{HookEvent, HookState};
use super::heuristics::Classification;
use crate::session::SessionStatus;

#[derive(Debug, Clone)]
struct HookRecord {
    state: HookState,
    message: String,
}

/// Token for a deferred question extraction; stale tokens are rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionTicket(u64);

/// Per-session merge of hook events and heuristic classifications.
///
/// Once any hook event has arrived the hook state is authoritative and
/// heuristic results are no longer consulted.
#[derive(Debug, Clone, Default)]
pub struct StatusState {
    hook: Option<HookRecord>,
    heuristic: Option<Classification>,
    waiting_question: String,
    generation: u64,
}

impl StatusState {
    pub fn status(&self) -> SessionStatus {
        match (&self.hook, &self.heuristic) {
            (Some(hook), _) => match hook.state {
                HookState::Busy => SessionStatus::Active,
                HookState::Done => SessionStatus::WaitingForInput,
            },
            (None, Some(c)) => c.session_status(),
            (None, None) => SessionStatus::Active,
        }
    }

    pub fn is_standby(&self) -> bool {
        match (&self.hook, &self.heuristic) {
            (Some(hook), _) => hook.state == HookState::Done,
            (None, Some(c)) => c.is_standby(),
            (None, None) => false,
        }
    }

    pub fn hook_done(&self) -> bool {
        matches!(&self.hook, Some(h) if h.state == HookState::Done)
    }

    pub fn hook_message(&self) -> &str {
        self.hook.as_ref().map(|h| h.message.as_str()).unwrap_or("")
    }

    pub fn waiting_question(&self) -> &str {
        &self.waiting_question
    }

    /// Short human-readable description of what the session is doing
    pub fn label(&self) -> String {
        if let Some(hook) = &self.hook {
            if !hook.message.is_empty() {
                return hook.message.clone();
            }
            return match hook.state {
                HookState::Busy => "Working...".to_string(),
                HookState::Done => "Waiting for input".to_string(),
            };
        }
        self.heuristic
            .as_ref()
            .map(|c| c.label.clone())
            .unwrap_or_else(|| "Terminal".to_string())
    }

    /// Apply a hook event. A `done` returns the ticket for its deferred
    /// question extraction; any event invalidates earlier tickets.
    pub fn apply_hook(&mut self, event: &HookEvent) -> Option<QuestionTicket> {
        self.generation += 1;
        self.hook = Some(HookRecord {
            state: event.state,
            message: event.message.clone(),
        });
        match event.state {
            HookState::Busy => {
                self.waiting_question.clear();
                None
            }
            HookState::Done => Some(QuestionTicket(self.generation)),
        }
    }

    /// Record a heuristic result; ignored once hooks cover the session
    pub fn apply_heuristic(&mut self, classification: Classification) {
        if self.hook.is_none() {
            self.heuristic = Some(classification);
        }
    }

    /// Publish a deferred question if its ticket is current and the session
    /// is still done. Returns whether it was applied.
    pub fn resolve_question(&mut self, ticket: QuestionTicket, question: String) -> bool {
        if ticket.0 != self.generation || !self.hook_done() {
            return false;
        }
        self.waiting_question = question;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use crate::status::heuristics::{HeuristicStatus, StandbyReason};

    fn hook(state: HookState, message: &str) -> HookEvent {
        HookEvent {
            session_id: SessionId::new(0),
            state,
            message: message.to_string(),
        }
    }

    fn heuristic(status: HeuristicStatus) -> Classification {
        Classification {
            status,
            label: "zsh".to_string(),
            rule: "test",
        }
    }

    #[test]
    fn test_done_means_waiting_and_hook_done() {
        let mut state = StatusState::default();
        let ticket = state.apply_hook(&hook(HookState::Done, "")).unwrap();
        assert_eq!(state.status(), SessionStatus::WaitingForInput);
        assert!(state.hook_done());
        assert!(state.is_standby());
        assert_eq!(state.hook_message(), "");

        assert!(state.resolve_question(ticket, "Proceed?".to_string()));
        assert_eq!(state.waiting_question(), "Proceed?");
    }

    #[test]
    fn test_busy_clears_question_and_beats_pending_extraction() {
        let mut state = StatusState::default();
        let first = state.apply_hook(&hook(HookState::Done, "Ready?")).unwrap();
        assert!(state.resolve_question(first, "Ready?".to_string()));

        let pending = state.apply_hook(&hook(HookState::Done, "Again?")).unwrap();
        assert!(state.apply_hook(&hook(HookState::Busy, "Editing")).is_none());
        assert_eq!(state.waiting_question(), "");
        assert_eq!(state.status(), SessionStatus::Active);
        assert_eq!(state.hook_message(), "Editing");

        // The earlier timer fires late and must not resurrect the question
        assert!(!state.resolve_question(pending, "Again?".to_string()));
        assert_eq!(state.waiting_question(), "");
    }

    #[test]
    fn test_stale_ticket_after_newer_done() {
        let mut state = StatusState::default();
        let old = state.apply_hook(&hook(HookState::Done, "a")).unwrap();
        let new = state.apply_hook(&hook(HookState::Done, "b")).unwrap();
        assert!(!state.resolve_question(old, "old".to_string()));
        assert!(state.resolve_question(new, "new".to_string()));
        assert_eq!(state.waiting_question(), "new");
    }

    #[test]
    fn test_heuristics_only_without_hooks() {
        let mut state = StatusState::default();
        assert_eq!(state.status(), SessionStatus::Active);

        state.apply_heuristic(heuristic(HeuristicStatus::Idle));
        assert_eq!(state.status(), SessionStatus::Idle);
        state.apply_heuristic(heuristic(HeuristicStatus::Standby(StandbyReason::Silence)));
        assert_eq!(state.status(), SessionStatus::WaitingForInput);
        assert!(state.is_standby());
        assert!(!state.hook_done());

        state.apply_hook(&hook(HookState::Busy, ""));
        state.apply_heuristic(heuristic(HeuristicStatus::Standby(StandbyReason::Bell)));
        assert_eq!(state.status(), SessionStatus::Active);
        assert_eq!(state.label(), "Working...");
    }

    #[test]
    fn test_waiting_implies_hook_done_once_hooked() {
        let mut state = StatusState::default();
        let events = [
            hook(HookState::Busy, "x"),
            hook(HookState::Done, "y"),
            hook(HookState::Busy, "z"),
            hook(HookState::Done, ""),
        ];
        for event in &events {
            state.apply_hook(event);
            state.apply_heuristic(heuristic(HeuristicStatus::Waiting));
            if state.status() == SessionStatus::WaitingForInput {
                assert!(state.hook_done());
            }
        }
    }
}
