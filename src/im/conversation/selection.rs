//! 当前选中会话跟踪

use std::sync::Mutex;

/// 一次选中操作的凭据，用于判断异步结果是否已过期
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    pub conversation_id: String,
    generation: u64,
}

#[derive(Debug, Default)]
struct SelectionState {
    active_id: Option<String>,
    generation: u64,
}

/// 当前打开的会话；每次选中都会递增代数，之前签发的凭据随即失效
#[derive(Debug, Default)]
pub struct ActiveSelection {
    state: Mutex<SelectionState>,
}

impl ActiveSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, conversation_id: &str) -> SelectionTicket {
        let mut state = self.lock();
        state.generation += 1;
        state.active_id = Some(conversation_id.to_string());
        SelectionTicket {
            conversation_id: conversation_id.to_string(),
            generation: state.generation,
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.active_id = None;
    }

    pub fn active_id(&self) -> Option<String> {
        self.lock().active_id.clone()
    }

    /// 凭据签发后没有发生新的选中，且目标仍是当前会话
    pub fn is_current(&self, ticket: &SelectionTicket) -> bool {
        let state = self.lock();
        state.generation == ticket.generation
            && state.active_id.as_deref() == Some(ticket.conversation_id.as_str())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SelectionState> {
        // 锁内没有会 panic 的操作，中毒时直接取回数据
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
