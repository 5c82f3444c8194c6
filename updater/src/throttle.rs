//! 업데이트 다이얼로그 빈도 제한

use std::sync::Mutex;

use crate::clock::DAY_MS;

/// 업데이트 알림 다이얼로그 최소 간격 (1일)
pub const UPDATE_DIALOG_INTERVAL_MS: i64 = DAY_MS;
/// 조용한 업데이트 다이얼로그 병합 구간 (30초)
pub const DIALOG_THROTTLE_TIME_MS: i64 = 30 * 1000;

/// 직전 다이얼로그로부터 하루가 지났는지
pub fn update_dialog_allowed(last_shown_at: Option<i64>, now_ms: i64) -> bool {
    match last_shown_at {
        Some(last) => now_ms - last >= UPDATE_DIALOG_INTERVAL_MS,
        None => true,
    }
}

/// 선행(leading) 스로틀. 구간 안의 두 번째 호출부터는 버린다
#[derive(Debug)]
pub struct LeadingThrottle {
    window_ms: i64,
    last_fired: Mutex<Option<i64>>,
}

impl LeadingThrottle {
    pub fn new(window_ms: i64) -> Self {
        Self { window_ms, last_fired: Mutex::new(None) }
    }

    /// 실행해도 되면 true를 반환하고 시각을 기록
    pub fn try_fire(&self, now_ms: i64) -> bool {
        let mut last = match self.last_fired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *last {
            Some(prev) if now_ms - prev < self.window_ms => false,
            _ => {
                *last = Some(now_ms);
                true
            }
        }
    }

    pub fn reset(&self) {
        if let Ok(mut last) = self.last_fired.lock() {
            *last = None;
        }
    }
}

impl Default for LeadingThrottle {
    fn default() -> Self {
        Self::new(DIALOG_THROTTLE_TIME_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_dialog_interval() {
        let now = 10 * DAY_MS;
        assert!(update_dialog_allowed(None, now));
        assert!(!update_dialog_allowed(Some(now - 1000), now));
        assert!(!update_dialog_allowed(Some(now - DAY_MS + 1), now));
        assert!(update_dialog_allowed(Some(now - DAY_MS), now));
    }

    #[test]
    fn leading_throttle_coalesces_within_window() {
        let throttle = LeadingThrottle::default();
        assert!(throttle.try_fire(0));
        assert!(!throttle.try_fire(10_000));
        assert!(!throttle.try_fire(29_999));
        assert!(throttle.try_fire(30_000));
        throttle.reset();
        assert!(throttle.try_fire(30_001));
    }
}
