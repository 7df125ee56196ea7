//! 외부 협력자 인터페이스
//!
//! - `ApprovalHandler`: 확인이 필요한 호출의 승인 콜백
//! - `ProgressNotifier`: 비동기 결과(승인 후 실행 완료, subagent 완료) 푸시

use async_trait::async_trait;
use serde_json::Value;

use super::context::DeliveryTarget;
use crate::Result;

/// 승인 요청 정보
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub session_id: String,
    pub caller_jid: String,
    pub tool: String,
    pub args: Value,
}

/// 승인 콜백
///
/// `Ok(true)` 승인, `Ok(false)` 거부, `Err` 는 승인 채널 실패로 간주한다.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> Result<bool>;
}

/// 진행 상황 알림 채널
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn notify(&self, target: &DeliveryTarget, message: &str);
}
