//! 업데이트 전략 분류기: 전략/상태 조합을 UI 노출 여부로 변환하는 순수 함수

use crate::status::{UpdateStatus, UpdateStrategy};

/// 사용자 확인 없이 자동으로 진행하는 전략인지
pub fn is_auto_update_strategy(strategy: UpdateStrategy) -> bool {
    matches!(strategy, UpdateStrategy::Silent | UpdateStrategy::Seamless)
}

/// 강제 업데이트 전략인지
pub fn is_force_update_strategy(strategy: UpdateStrategy) -> bool {
    strategy == UpdateStrategy::Force
}

/// 업데이트 진행 중 UI를 노출할지
///
/// - seamless: 절대 노출하지 않음
/// - manual / force: 항상 노출
/// - silent: 패키지 검증이 끝나 `ready`가 된 뒤에만 노출
pub fn is_show_app_update_ui_when_updating(
    update_strategy: UpdateStrategy,
    update_status: UpdateStatus,
) -> bool {
    match update_strategy {
        UpdateStrategy::Seamless => false,
        UpdateStrategy::Manual | UpdateStrategy::Force => true,
        UpdateStrategy::Silent => update_status == UpdateStatus::Ready,
    }
}

/// 에러 토스트를 띄울지 (사용자가 요청하지 않은 자동 업데이트는 조용히 실패)
pub fn is_show_toast_error(update_strategy: UpdateStrategy) -> bool {
    !is_auto_update_strategy(update_strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_strategies() {
        assert!(!is_auto_update_strategy(UpdateStrategy::Manual));
        assert!(!is_auto_update_strategy(UpdateStrategy::Force));
        assert!(is_auto_update_strategy(UpdateStrategy::Silent));
        assert!(is_auto_update_strategy(UpdateStrategy::Seamless));
    }

    #[test]
    fn force_only_for_force() {
        for strategy in UpdateStrategy::ALL {
            assert_eq!(is_force_update_strategy(strategy), strategy == UpdateStrategy::Force);
        }
    }

    #[test]
    fn show_ui_truth_table() {
        for status in UpdateStatus::ALL {
            assert!(!is_show_app_update_ui_when_updating(UpdateStrategy::Seamless, status));
            assert!(is_show_app_update_ui_when_updating(UpdateStrategy::Manual, status));
            assert!(is_show_app_update_ui_when_updating(UpdateStrategy::Force, status));
            assert_eq!(
                is_show_app_update_ui_when_updating(UpdateStrategy::Silent, status),
                status == UpdateStatus::Ready
            );
        }
    }

    #[test]
    fn show_ui_examples() {
        assert!(!is_show_app_update_ui_when_updating(UpdateStrategy::Seamless, UpdateStatus::Ready));
        assert!(is_show_app_update_ui_when_updating(UpdateStrategy::Manual, UpdateStatus::DownloadPackage));
        assert!(!is_show_app_update_ui_when_updating(UpdateStrategy::Silent, UpdateStatus::Notify));
        assert!(is_show_app_update_ui_when_updating(UpdateStrategy::Silent, UpdateStatus::Ready));
    }

    #[test]
    fn toast_suppressed_for_auto_strategies() {
        assert!(is_show_toast_error(UpdateStrategy::Manual));
        assert!(is_show_toast_error(UpdateStrategy::Force));
        assert!(!is_show_toast_error(UpdateStrategy::Silent));
        assert!(!is_show_toast_error(UpdateStrategy::Seamless));
    }
}
