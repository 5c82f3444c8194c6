//! 업데이트 레코드 저장소
//!
//! 상태 파일(`updater-state.json`) 하나에 `UpdateInfo`를 저장합니다.
//! - 모든 쓰기는 즉시 디스크에 반영 (임시 파일 → rename)
//! - 동시 쓰기는 마지막 쓰기가 이김
//! - 새 스냅샷은 `subscribe()`로 브로드캐스트

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::info::UpdateInfo;

/// 기본 상태 파일 이름
pub const STATE_FILE_NAME: &str = "updater-state.json";

/// 상태 파일 관리
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// 플랫폼 기본 경로 (`%APPDATA%/wallet` 또는 `~/.wallet`)
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA")
                .map(|appdata| PathBuf::from(appdata).join("wallet").join(STATE_FILE_NAME))
                .unwrap_or_else(|_| PathBuf::from(STATE_FILE_NAME))
        }
        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".wallet").join(STATE_FILE_NAME))
                .unwrap_or_else(|_| PathBuf::from(STATE_FILE_NAME))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 상태 저장 (임시 파일에 쓰고 교체)
    pub async fn save(&self, info: &UpdateInfo) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(info).context("Failed to serialize update info")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// 상태 로드. 파일이 없으면 `Ok(None)`
    pub async fn load(&self) -> Result<Option<UpdateInfo>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        };
        let info = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(info))
    }
}

/// 프로세스 전체에서 하나뿐인 업데이트 레코드 저장소
#[derive(Clone)]
pub struct UpdateInfoStore {
    state: Arc<RwLock<UpdateInfo>>,
    file: Option<StateFile>,
    events: broadcast::Sender<UpdateInfo>,
}

impl UpdateInfoStore {
    /// 상태 파일에서 로드. 없거나 읽을 수 없으면 `fallback`으로 시작
    pub async fn load_or_default(file: StateFile, fallback: UpdateInfo) -> Self {
        let info = match file.load().await {
            Ok(Some(info)) => {
                tracing::debug!("[Store] Loaded update state from {}", file.path().display());
                info
            }
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!("[Store] Unreadable update state, starting from defaults: {:#}", e);
                fallback
            }
        };
        Self::build(info, Some(file))
    }

    /// 디스크에 쓰지 않는 저장소 (테스트/임시 호스트용)
    pub fn in_memory(info: UpdateInfo) -> Self {
        Self::build(info, None)
    }

    fn build(info: UpdateInfo, file: Option<StateFile>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(RwLock::new(info)),
            file,
            events,
        }
    }

    pub async fn get(&self) -> UpdateInfo {
        self.state.read().await.clone()
    }

    pub async fn set(&self, info: UpdateInfo) -> Result<UpdateInfo> {
        self.update(move |current| *current = info).await
    }

    /// 레코드 수정 후 저장. 저장된 스냅샷을 반환
    pub async fn update<F>(&self, f: F) -> Result<UpdateInfo>
    where
        F: FnOnce(&mut UpdateInfo),
    {
        let snapshot = {
            let mut guard = self.state.write().await;
            f(&mut guard);
            let snapshot = guard.clone();
            // 쓰기 락을 쥔 채 저장해야 파일 내용이 메모리와 같은 순서로 남는다
            if let Some(file) = &self.file {
                file.save(&snapshot).await?;
            }
            snapshot
        };
        // 구독자가 없으면 Err: 무시
        let _ = self.events.send(snapshot.clone());
        Ok(snapshot)
    }

    /// 새 스냅샷 구독
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateInfo> {
        self.events.subscribe()
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.file.as_ref().map(StateFile::path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{UpdateStatus, UpdateStrategy};

    #[tokio::test]
    async fn missing_file_starts_from_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::with_path(dir.path().join(STATE_FILE_NAME));
        let store = UpdateInfoStore::load_or_default(file, UpdateInfo::default()).await;
        assert_eq!(store.get().await, UpdateInfo::default());
    }

    #[tokio::test]
    async fn writes_through_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(STATE_FILE_NAME);
        let store = UpdateInfoStore::load_or_default(StateFile::with_path(path.clone()), UpdateInfo::default()).await;

        store
            .update(|info| {
                info.latest_version = "5.3.0".into();
                info.status = UpdateStatus::DownloadAsc;
                info.update_strategy = UpdateStrategy::Force;
            })
            .await
            .unwrap();
        let saved = store.get().await;

        let reloaded = UpdateInfoStore::load_or_default(StateFile::with_path(path.clone()), UpdateInfo::default()).await;
        assert_eq!(reloaded.get().await, saved);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        let fallback = UpdateInfo {
            latest_version: "5.2.0".into(),
            ..Default::default()
        };
        let store = UpdateInfoStore::load_or_default(StateFile::with_path(path), fallback.clone()).await;
        assert_eq!(store.get().await, fallback);
    }

    #[tokio::test]
    async fn subscribers_receive_snapshots() {
        let store = UpdateInfoStore::in_memory(UpdateInfo::default());
        let mut rx = store.subscribe();
        store.update(|info| info.status = UpdateStatus::Notify).await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.status, UpdateStatus::Notify);
        assert!(store.state_path().is_none());
    }
}
