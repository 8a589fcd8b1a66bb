//! 会话控制信号：暂停标志 + 按作用域发放的取消令牌
//!
//! pause() 置位暂停标志并取消当前作用域的令牌，使正在挂起点
//! （LLM 调用、工具调用）等待的任务协作式退出；resume() 只清除标志，
//! 新的执行作用域通过 begin_scope() 获取全新令牌。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级信号。Orchestrator 与外部控制面（stdin / UI）共享同一实例。
#[derive(Debug, Default)]
pub struct SessionSignals {
    paused: AtomicBool,
    current: Mutex<CancellationToken>,
}

impl SessionSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求暂停：置位标志并取消当前作用域令牌。
    /// 执行循环在下一个步骤边界停下；步骤内部在下一个挂起点感知取消。
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Ok(token) = self.current.lock() {
            token.cancel();
        }
    }

    /// 清除暂停标志。已取消的令牌不复用，由下一个 begin_scope() 换新。
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// 开启一个新的执行作用域（通常是一个步骤），返回该作用域的取消令牌。
    pub fn begin_scope(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut cur) = self.current.lock() {
            *cur = token.clone();
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_cancels_current_scope() {
        let signals = SessionSignals::new();
        let token = signals.begin_scope();
        assert!(!token.is_cancelled());

        signals.pause();
        assert!(signals.is_paused());
        assert!(token.is_cancelled());
    }

    #[test]
    fn resume_and_new_scope_yields_fresh_token() {
        let signals = SessionSignals::new();
        let old = signals.begin_scope();
        signals.pause();
        signals.resume();
        assert!(!signals.is_paused());

        let fresh = signals.begin_scope();
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
    }
}
