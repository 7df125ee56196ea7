//! 파괴적 도구 속도 제한
//!
//! - 도구별 60초 슬라이딩 윈도우
//! - 같은 도구 연속 호출(streak) 배치 경고
//! - 파괴적 호출 사이 쿨다운 (모든 도구 공유)

use parking_lot::{Mutex, RwLock};
use sentinel_foundation::DestructiveConfig;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// 추적기 판정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestructiveVerdict {
    Allow,
    /// 허용하되 경고 (필요 시 사용자 확인)
    Warn {
        message: String,
        requires_confirmation: bool,
    },
    /// 속도 제한 / 쿨다운
    Deny(String),
}

#[derive(Debug, Default)]
struct TrackerState {
    windows: HashMap<String, VecDeque<Instant>>,
    last_call: Option<Instant>,
    last_tool: Option<String>,
    streak: usize,
}

/// 파괴적 도구 호출 추적기
#[derive(Debug, Default)]
pub struct DestructiveTracker {
    config: RwLock<DestructiveConfig>,
    state: Mutex<TrackerState>,
}

impl DestructiveTracker {
    pub fn new(config: DestructiveConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn config(&self) -> DestructiveConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: DestructiveConfig) {
        *self.config.write() = config;
    }

    /// 파괴적 도구 호출 판정 및 기록
    pub fn check(&self, tool: &str) -> DestructiveVerdict {
        self.check_at(tool, Instant::now())
    }

    pub fn check_at(&self, tool: &str, now: Instant) -> DestructiveVerdict {
        let config = self.config();
        let mut state = self.state.lock();

        if config.cooldown_secs > 0 {
            if let Some(last) = state.last_call {
                let elapsed = now.saturating_duration_since(last);
                let cooldown = Duration::from_secs(config.cooldown_secs);
                if elapsed < cooldown {
                    let remaining = (cooldown - elapsed).as_secs_f64().ceil() as u64;
                    return DestructiveVerdict::Deny(format!(
                        "destructive operation cooldown: wait {}s before calling {}",
                        remaining.max(1),
                        tool
                    ));
                }
            }
        }

        let window = state.windows.entry(tool.to_string()).or_default();
        while let Some(front) = window.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= config.max_per_minute {
            return DestructiveVerdict::Deny(format!(
                "rate limit exceeded: {} allows at most {} calls per minute",
                tool, config.max_per_minute
            ));
        }
        window.push_back(now);
        state.last_call = Some(now);

        Self::bump_streak(&mut state, tool);

        if config.batch_threshold > 0 && state.streak >= config.batch_threshold {
            return DestructiveVerdict::Warn {
                message: format!(
                    "{} consecutive {} calls; this looks like a batch destructive operation",
                    state.streak, tool
                ),
                requires_confirmation: config.batch_requires_confirmation,
            };
        }
        DestructiveVerdict::Allow
    }

    /// 비파괴 도구 호출 (streak 끊기)
    pub fn note_call(&self, tool: &str) {
        let mut state = self.state.lock();
        Self::bump_streak(&mut state, tool);
    }

    fn bump_streak(state: &mut TrackerState, tool: &str) {
        if state.last_tool.as_deref() == Some(tool) {
            state.streak += 1;
        } else {
            state.last_tool = Some(tool.to_string());
            state.streak = 1;
        }
    }

    pub fn streak(&self) -> usize {
        self.state.lock().streak
    }

    /// 윈도우 내 기록 수
    pub fn window_len(&self, tool: &str) -> usize {
        self.state
            .lock()
            .windows
            .get(tool)
            .map(|w| w.len())
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        *self.state.lock() = TrackerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(max: usize, batch: usize, cooldown: u64) -> DestructiveTracker {
        DestructiveTracker::new(DestructiveConfig {
            max_per_minute: max,
            batch_threshold: batch,
            cooldown_secs: cooldown,
            batch_requires_confirmation: true,
        })
    }

    #[test]
    fn test_rate_limit_window() {
        let t = tracker(3, 100, 0);
        let start = Instant::now();
        for i in 0..3 {
            assert_eq!(
                t.check_at("delete_file", start + Duration::from_secs(i)),
                DestructiveVerdict::Allow
            );
        }
        assert!(matches!(
            t.check_at("delete_file", start + Duration::from_secs(10)),
            DestructiveVerdict::Deny(_)
        ));
        // 거부된 시도는 기록되지 않는다
        assert_eq!(t.window_len("delete_file"), 3);

        // 다른 도구는 별도 윈도우
        assert_eq!(
            t.check_at("remove_directory", start + Duration::from_secs(10)),
            DestructiveVerdict::Allow
        );

        // 첫 호출이 60초 지나면 다시 허용
        assert_eq!(
            t.check_at("delete_file", start + Duration::from_secs(60)),
            DestructiveVerdict::Allow
        );
    }

    #[test]
    fn test_batch_streak_warns() {
        let t = tracker(100, 3, 0);
        let now = Instant::now();
        assert_eq!(t.check_at("delete_file", now), DestructiveVerdict::Allow);
        assert_eq!(t.check_at("delete_file", now), DestructiveVerdict::Allow);
        match t.check_at("delete_file", now) {
            DestructiveVerdict::Warn {
                requires_confirmation,
                message,
            } => {
                assert!(requires_confirmation);
                assert!(message.contains("3 consecutive"));
            }
            other => panic!("expected warn, got {:?}", other),
        }
    }

    #[test]
    fn test_other_tool_breaks_streak() {
        let t = tracker(100, 3, 0);
        let now = Instant::now();
        t.check_at("delete_file", now);
        t.check_at("delete_file", now);
        t.note_call("read_file");
        assert_eq!(t.streak(), 1);
        assert_eq!(t.check_at("delete_file", now), DestructiveVerdict::Allow);
    }

    #[test]
    fn test_cooldown_shared_across_tools() {
        let t = tracker(100, 100, 5);
        let start = Instant::now();
        assert_eq!(t.check_at("delete_file", start), DestructiveVerdict::Allow);
        match t.check_at("remove_directory", start + Duration::from_secs(2)) {
            DestructiveVerdict::Deny(msg) => assert!(msg.contains("wait 3s")),
            other => panic!("expected deny, got {:?}", other),
        }
        assert_eq!(
            t.check_at("remove_directory", start + Duration::from_secs(5)),
            DestructiveVerdict::Allow
        );
    }

    #[test]
    fn test_reset() {
        let t = tracker(1, 100, 0);
        let now = Instant::now();
        t.check_at("delete_file", now);
        assert!(matches!(t.check_at("delete_file", now), DestructiveVerdict::Deny(_)));
        t.reset();
        assert_eq!(t.check_at("delete_file", now), DestructiveVerdict::Allow);
    }
}
