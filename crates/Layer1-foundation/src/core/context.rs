//! 호출 컨텍스트
//!
//! 요청 단위로 호출자 정보와 취소 스코프를 전달한다.
//! 전역 가변 호출자 대신 이 컨텍스트가 Executor → Handler → Subagent 로 흐른다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::types::CallerIdentity;

/// 협조적 중단 신호
///
/// 오래 걸리는 핸들러가 주기적으로 `is_raised()`를 확인한다.
/// 에이전트 실행마다 새 신호가 발급된다.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 결과 전달 주소 (비동기 알림 대상)
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct DeliveryTarget {
    pub session_id: String,
    pub caller_jid: String,
    /// 채널 이름 (예: "whatsapp", "cli")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl DeliveryTarget {
    pub fn from_identity(identity: &CallerIdentity) -> Self {
        Self {
            session_id: identity.session_id.clone(),
            caller_jid: identity.caller_jid.clone(),
            channel: None,
        }
    }
}

/// 도구 호출 컨텍스트
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// 호출자 (없으면 Executor 기본값 사용)
    pub identity: Option<CallerIdentity>,
    /// 취소 스코프
    pub cancel: CancellationToken,
    /// 협조적 중단 신호
    pub abort: AbortSignal,
    /// 현재 spawn 깊이 (최상위 = 0)
    pub spawn_depth: u32,
    /// 현재 실행 중인 subagent run ID
    pub run_id: Option<String>,
    /// 비동기 결과 전달 주소
    pub origin: Option<DeliveryTarget>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: CallerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_spawn_depth(mut self, depth: u32) -> Self {
        self.spawn_depth = depth;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_origin(mut self, origin: DeliveryTarget) -> Self {
        self.origin = Some(origin);
        self
    }

    /// 자식 취소 스코프를 가진 컨텍스트 (부모 취소 시 함께 취소됨)
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// 핸들러가 중단해야 하는지
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_raised()
    }

    /// 결과 전달 주소 (origin이 없으면 identity로부터 유도)
    pub fn delivery_target(&self) -> Option<DeliveryTarget> {
        self.origin
            .clone()
            .or_else(|| self.identity.as_ref().map(DeliveryTarget::from_identity))
    }
}
