//! 会话监管：生命周期、中断管理
//!
//! 持有会话级 CancellationToken；每个轮次使用一个子 token，用户 Ctrl+C 时只取消当前轮次，
//! 会话退出时取消全部。

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：会话 token 与当前轮次 token
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 会话退出时触发
    session_token: CancellationToken,
    /// 当前轮次（无进行中的轮次时为 None）
    turn_token: Option<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            session_token: CancellationToken::new(),
            turn_token: None,
        }
    }

    /// 开始新轮次，返回该轮次的子 token
    pub fn begin_turn(&mut self) -> CancellationToken {
        let token = self.session_token.child_token();
        self.turn_token = Some(token.clone());
        token
    }

    pub fn end_turn(&mut self) {
        self.turn_token = None;
    }

    /// 取消当前轮次（用户 Ctrl+C）；返回是否确有轮次被取消
    pub fn cancel_turn(&self) -> bool {
        match &self.turn_token {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// 会话退出：取消所有派生 token
    pub fn shutdown(&self) {
        self.session_token.cancel();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
