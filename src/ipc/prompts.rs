//! UI 프롬프트 브로커: `UpdatePresenter`를 IPC 큐로 연결
//!
//! 컨트롤러가 띄우는 다이얼로그/토스트/화면 이동 요청을 큐에 쌓고,
//! 지갑 UI가 `GET /api/app-update/prompts`로 가져가 `POST /prompts/:id`로 응답합니다.
//! 응답이 없으면 `dialog_timeout` 뒤 취소로 처리합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use wallet_updater_lib::{DialogChoice, UpdateDialog, UpdatePresenter, UpdateRoute};

/// 다이얼로그 응답 대기 한도
pub const DEFAULT_DIALOG_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// UI가 가져가지 않은 토스트/화면 이동 요청 보관 한도. 넘치면 오래된 것부터 버린다
pub const MAX_PENDING_NOTICES: usize = 32;

/// UI로 전달되는 요청 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Prompt {
    Dialog { id: u64, dialog: UpdateDialog },
    Toast { id: u64, message: String },
    Navigate { id: u64, route: UpdateRoute },
}

impl Prompt {
    pub fn id(&self) -> u64 {
        match self {
            Prompt::Dialog { id, .. } | Prompt::Toast { id, .. } | Prompt::Navigate { id, .. } => *id,
        }
    }
}

#[derive(Default)]
struct Queue {
    prompts: Vec<Prompt>,
    waiters: HashMap<u64, oneshot::Sender<DialogChoice>>,
}

pub struct PromptBroker {
    next_id: AtomicU64,
    queue: Mutex<Queue>,
    unlocked: watch::Sender<bool>,
    dialog_timeout: Duration,
}

impl Default for PromptBroker {
    fn default() -> Self {
        Self::new(DEFAULT_DIALOG_TIMEOUT)
    }
}

impl PromptBroker {
    pub fn new(dialog_timeout: Duration) -> Self {
        let (unlocked, _) = watch::channel(true);
        Self {
            next_id: AtomicU64::new(1),
            queue: Mutex::new(Queue::default()),
            unlocked,
            dialog_timeout,
        }
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, make: impl FnOnce(u64) -> Prompt) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.queue();
        queue.prompts.push(make(id));

        let notices = queue.prompts.iter().filter(|p| !matches!(p, Prompt::Dialog { .. })).count();
        if notices > MAX_PENDING_NOTICES {
            let mut excess = notices - MAX_PENDING_NOTICES;
            queue.prompts.retain(|p| {
                if excess > 0 && !matches!(p, Prompt::Dialog { .. }) {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
            tracing::debug!("[Prompts] No UI polling, dropped oldest notice");
        }
        id
    }

    /// 대기 중인 요청. 토스트/화면 이동은 한 번 읽으면 빠지고, 다이얼로그는 응답할 때까지 남는다
    pub fn take_pending(&self) -> Vec<Prompt> {
        let mut queue = self.queue();
        let pending = queue.prompts.clone();
        queue.prompts.retain(|p| matches!(p, Prompt::Dialog { .. }));
        pending
    }

    /// 다이얼로그 응답. 대기 중인 다이얼로그가 없으면 false
    pub fn resolve(&self, id: u64, choice: DialogChoice) -> bool {
        let waiter = {
            let mut queue = self.queue();
            queue.prompts.retain(|p| p.id() != id);
            queue.waiters.remove(&id)
        };
        match waiter {
            Some(tx) => {
                tracing::info!("[Prompts] Dialog {} resolved: {:?}", id, choice);
                tx.send(choice).is_ok()
            }
            None => false,
        }
    }

    pub fn set_locked(&self, locked: bool) {
        self.unlocked.send_replace(!locked);
        tracing::info!("[Prompts] App {}", if locked { "locked" } else { "unlocked" });
    }

    pub fn is_locked(&self) -> bool {
        !*self.unlocked.borrow()
    }
}

#[async_trait]
impl UpdatePresenter for PromptBroker {
    async fn show_dialog(&self, dialog: UpdateDialog) -> DialogChoice {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut queue = self.queue();
            queue.waiters.insert(id, tx);
            queue.prompts.push(Prompt::Dialog { id, dialog });
        }
        tracing::debug!("[Prompts] Dialog {} queued", id);

        let choice = match tokio::time::timeout(self.dialog_timeout, rx).await {
            Ok(Ok(choice)) => choice,
            Ok(Err(_)) => DialogChoice::Cancel,
            Err(_) => {
                tracing::info!("[Prompts] Dialog {} timed out, treating as cancel", id);
                DialogChoice::Cancel
            }
        };

        let mut queue = self.queue();
        queue.prompts.retain(|p| p.id() != id);
        queue.waiters.remove(&id);
        choice
    }

    fn show_toast_error(&self, message: &str) {
        let message = message.to_string();
        self.push(|id| Prompt::Toast { id, message });
    }

    fn navigate(&self, route: UpdateRoute) {
        self.push(|id| Prompt::Navigate { id, route });
    }

    async fn when_app_unlocked(&self) {
        let mut rx = self.unlocked.subscribe();
        if rx.wait_for(|unlocked| *unlocked).await.is_err() {
            tracing::debug!("[Prompts] Lock channel closed");
        }
    }
}
