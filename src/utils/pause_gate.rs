//! 工作流暂停闸门
//!
//! 进程级共享状态: 暂停节点在闸门上等待, HTTP 端点负责放行或终止。
//! 基于 Condvar 阻塞等待, 不做忙轮询

use std::sync::{Condvar, Mutex};

use lazy_static::lazy_static;

lazy_static! {
    /// 全局闸门, 被暂停节点与 web 端点共享
    pub static ref WORKFLOW_GATE: PauseGate = PauseGate::new();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// 用户放行, 工作流继续
    Resumed,
    /// 用户终止工作流
    Stopped,
}

#[derive(Debug)]
struct GateState {
    paused: bool,
    stopped: bool,
}

/// 暂停/恢复/终止 闸门
///
/// 初始为暂停态; wait 返回后状态自动复位, 下一次执行重新暂停
#[derive(Debug)]
pub struct PauseGate {
    state: Mutex<GateState>,
    condvar: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                paused: true,
                stopped: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// 阻塞直到被放行或终止
    ///
    /// 锁中毒时按终止处理, 不向调用方传播 panic
    pub fn wait(&self) -> GateSignal {
        let Ok(mut state) = self.state.lock() else {
            return GateSignal::Stopped;
        };
        while state.paused && !state.stopped {
            state = match self.condvar.wait(state) {
                Ok(s) => s,
                Err(_) => return GateSignal::Stopped,
            };
        }

        let signal = if state.stopped {
            GateSignal::Stopped
        } else {
            GateSignal::Resumed
        };
        // 复位, 下一次进入暂停节点时重新等待
        state.paused = true;
        state.stopped = false;
        signal
    }

    pub fn resume(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.paused = false;
        }
        self.condvar.notify_all();
    }

    pub fn stop(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.stopped = true;
        }
        self.condvar.notify_all();
    }

    /// 回到初始暂停态
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.paused = true;
            state.stopped = false;
        }
    }

    pub fn should_stop(&self) -> bool {
        self.state.lock().map(|state| state.stopped).unwrap_or(true)
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().map(|state| state.paused).unwrap_or(false)
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn test_resume_releases_waiter() {
        let gate = Arc::new(PauseGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };

        thread::sleep(Duration::from_millis(50));
        gate.resume();
        assert_eq!(waiter.join().unwrap(), GateSignal::Resumed);
        // wait 返回后复位为暂停态
        assert!(gate.is_paused());
    }

    #[test]
    fn test_stop_releases_waiter() {
        let gate = Arc::new(PauseGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };

        thread::sleep(Duration::from_millis(50));
        gate.stop();
        assert_eq!(waiter.join().unwrap(), GateSignal::Stopped);
        assert!(!gate.should_stop());
    }

    #[test]
    fn test_stop_flag_visible_without_wait() {
        let gate = PauseGate::new();
        assert!(!gate.should_stop());
        gate.stop();
        assert!(gate.should_stop());
        gate.reset();
        assert!(!gate.should_stop());
        assert!(gate.is_paused());
    }
}
