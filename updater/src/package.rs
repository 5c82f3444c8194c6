//! 패키지 백엔드: 다운로드, 서명(ASC) 확인, 무결성 검증, 설치
//!
//! ## ASC 형식
//! ```text
//! <패키지 SHA-256 hex>
//! <첫 줄에 대한 Ed25519 서명 (base64)>
//! ```
//! 서명 검증(verifyASC)은 첫 줄의 다이제스트가 배포 키로 서명됐는지만 확인하고,
//! 패키지 검증(verifyPackage)은 실제 파일 해시가 서명된 다이제스트와 같은지 확인합니다.

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::UpdaterError;
use crate::info::{DownloadedEvent, UpdateInfo};
use crate::status::UpdateFileType;

const MAX_SIGNATURE_BYTES: usize = 4096;
/// 번들 설치 후 현재 버전을 기록하는 파일
pub const CURRENT_BUNDLE_MARKER: &str = "current";

/// 다운로드 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub downloaded_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl DownloadResult {
    /// 다운로드 파라미터에 결과를 덮어써서 다음 단계로 넘길 이벤트를 만든다
    pub fn merge_into(self, params: DownloadedEvent) -> DownloadedEvent {
        DownloadedEvent {
            downloaded_file: Some(self.downloaded_file),
            download_url: self.download_url.or(params.download_url),
            file_size: self.file_size.or(params.file_size),
            ..params
        }
    }
}

/// 플랫폼 자동 업데이트 모듈 포트
#[async_trait]
pub trait PackageBackend: Send + Sync {
    /// 아티팩트 다운로드. 플랫폼이 다운로드를 직접 처리하면 `Ok(None)`
    async fn download_package(
        &self,
        file_type: UpdateFileType,
        params: &DownloadedEvent,
    ) -> Result<Option<DownloadResult>, UpdaterError>;

    async fn download_asc(&self, file_type: UpdateFileType, event: &DownloadedEvent) -> Result<(), UpdaterError>;

    async fn verify_asc(&self, file_type: UpdateFileType, event: &DownloadedEvent) -> Result<(), UpdaterError>;

    async fn verify_package(&self, file_type: UpdateFileType, event: &DownloadedEvent) -> Result<(), UpdaterError>;

    /// 전체 패키지 설치 (설치 프로그램 실행)
    async fn install_package(&self, info: &UpdateInfo) -> Result<(), UpdaterError>;

    /// 번들 교체
    async fn install_bundle(&self, event: &DownloadedEvent) -> Result<(), UpdaterError>;

    /// 사용자가 직접 설치하도록 파일 위치를 연다
    async fn manual_install_package(&self, event: &DownloadedEvent, build_number: u32) -> Result<(), UpdaterError>;

    /// 다운로드한 패키지/번들 정리
    async fn clear_package(&self) -> Result<(), UpdaterError>;
}

// ══════════════════════════════════════════════════════
// 파일 시스템 백엔드 (데스크톱)
// ══════════════════════════════════════════════════════

/// 데스크톱 백엔드 설정
#[derive(Debug, Clone)]
pub struct FsPackageConfig {
    /// 다운로드 스테이징 디렉터리
    pub staging_dir: PathBuf,
    /// 번들 설치 디렉터리
    pub bundle_dir: PathBuf,
    /// 배포 서명 공개키 (base64, 32바이트)
    pub public_key_base64: Option<String>,
    pub request_timeout: Duration,
}

pub struct FsPackageBackend {
    config: FsPackageConfig,
    http: reqwest::Client,
}

impl FsPackageBackend {
    pub fn new(config: FsPackageConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("wallet-updater/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn staged_path(&self, file_type: UpdateFileType, params: &DownloadedEvent, url: &str) -> Result<PathBuf, UpdaterError> {
        let version = match file_type {
            UpdateFileType::JsBundle => params.bundle_version.as_deref(),
            UpdateFileType::AppShell => params.latest_version.as_deref(),
        }
        .unwrap_or("unknown");
        let version = single_segment(version)
            .ok_or_else(|| UpdaterError::download(format!("Refusing download for unsafe version '{}'", version)))?;
        let file_name = file_name_from_url(url).unwrap_or_else(|| "package.bin".to_string());
        Ok(self.config.staging_dir.join(version).join(file_name))
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64, UpdaterError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, "download", self.config.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::DownloadFailure {
                message: format!("Cannot download {}: {}", url, status),
                status_code: Some(status.as_u16()),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdaterError::from_io(&e, "create_dir", &parent.display().to_string()))?;
        }
        let part = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "create", &part.display().to_string()))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpdaterError::from_reqwest(&e, "download", self.config.request_timeout))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdaterError::from_io(&e, "write", &part.display().to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| UpdaterError::from_io(&e, "flush", &part.display().to_string()))?;
        drop(file);

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "rename", &dest.display().to_string()))?;
        Ok(written)
    }

    fn public_key(&self) -> Result<&str, UpdaterError> {
        self.config
            .public_key_base64
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| UpdaterError::signature("No release signing key configured"))
    }
}

#[async_trait]
impl PackageBackend for FsPackageBackend {
    async fn download_package(
        &self,
        file_type: UpdateFileType,
        params: &DownloadedEvent,
    ) -> Result<Option<DownloadResult>, UpdaterError> {
        let url = params
            .download_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| UpdaterError::download("Cannot download: release has no download url"))?;
        let dest = self.staged_path(file_type, params, url)?;

        tracing::info!("[Package] Downloading {} → {}", url, dest.display());
        let written = self.fetch_to_file(url, &dest).await?;

        if let Some(expected) = params.file_size.filter(|size| *size > 0) {
            if expected != written {
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(UpdaterError::download(format!(
                    "Downloaded size mismatch: expected {} bytes, got {}",
                    expected, written
                )));
            }
        }
        tracing::info!("[Package] Downloaded {} bytes", written);

        Ok(Some(DownloadResult {
            downloaded_file: dest.display().to_string(),
            download_url: Some(url.to_string()),
            file_size: Some(written),
        }))
    }

    async fn download_asc(&self, file_type: UpdateFileType, event: &DownloadedEvent) -> Result<(), UpdaterError> {
        let package = downloaded_path(event)?;
        let asc = asc_path(&package);
        match file_type {
            // 번들 서명은 릴리스 정보에 포함돼 있으므로 파일로만 기록
            UpdateFileType::JsBundle => {
                let (Some(sha256), Some(signature)) = (event.sha256.as_deref(), event.signature.as_deref()) else {
                    return Err(UpdaterError::download("Bundle signature is missing from release info"));
                };
                tokio::fs::write(&asc, format!("{}\n{}\n", sha256.trim(), signature.trim()))
                    .await
                    .map_err(|e| UpdaterError::from_io(&e, "write", &asc.display().to_string()))?;
            }
            UpdateFileType::AppShell => {
                let url = event
                    .download_url
                    .as_deref()
                    .ok_or_else(|| UpdaterError::download("Cannot download signature: missing download url"))?;
                self.fetch_to_file(&format!("{}.asc", url), &asc).await?;
            }
        }
        tracing::info!("[Package] Signature saved to {}", asc.display());
        Ok(())
    }

    async fn verify_asc(&self, _file_type: UpdateFileType, event: &DownloadedEvent) -> Result<(), UpdaterError> {
        let package = downloaded_path(event)?;
        let asc = asc_path(&package);
        let content = tokio::fs::read(&asc)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "read", &asc.display().to_string()))?;
        let signed = parse_asc(&content)?;
        verify_digest_signature(&signed, self.public_key()?)?;
        tracing::info!("[Package] Signature verified for {}", package.display());
        Ok(())
    }

    async fn verify_package(&self, file_type: UpdateFileType, event: &DownloadedEvent) -> Result<(), UpdaterError> {
        let package = downloaded_path(event)?;
        let asc = asc_path(&package);
        let content = tokio::fs::read(&asc)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "read", &asc.display().to_string()))?;
        let signed = parse_asc(&content)?;

        let actual = sha256_file_blocking(package.clone()).await?;
        if !actual.eq_ignore_ascii_case(&signed.digest) {
            return Err(UpdaterError::package("UPDATE_INSTALLATION_NOT_SAFE_ALERT_TEXT"));
        }
        if file_type == UpdateFileType::JsBundle {
            if let Some(declared) = event.sha256.as_deref() {
                if !actual.eq_ignore_ascii_case(declared.trim()) {
                    return Err(UpdaterError::package("UPDATE_INSTALLATION_NOT_SAFE_ALERT_TEXT"));
                }
            }
        }
        tracing::info!("[Package] Package digest matches ({})", actual);
        Ok(())
    }

    async fn install_package(&self, info: &UpdateInfo) -> Result<(), UpdaterError> {
        let event = info
            .downloaded_event
            .as_ref()
            .ok_or_else(|| UpdaterError::missing_artifact(None))?;
        let package = downloaded_path(event)?;
        ensure_exists(&package).await?;

        let kind = InstallerKind::for_path(&package);
        tracing::info!("[Package] Launching installer {} ({:?})", package.display(), kind);
        launch_installer(kind, &package)
            .map_err(|e| UpdaterError::install(format!("Failed to launch installer: {}", e)))?;
        Ok(())
    }

    async fn install_bundle(&self, event: &DownloadedEvent) -> Result<(), UpdaterError> {
        let package = downloaded_path(event)?;
        ensure_exists(&package).await?;
        let requested = event.bundle_version.as_deref().unwrap_or("unknown");
        let version = single_segment(requested)
            .ok_or_else(|| UpdaterError::install(format!("Refusing bundle with unsafe version '{}'", requested)))?
            .to_string();
        let target = self.config.bundle_dir.join(&version);

        let bundle_dir = self.config.bundle_dir.clone();
        let extract_target = target.clone();
        tokio::task::spawn_blocking(move || extract_zip(&package, &extract_target))
            .await
            .map_err(|e| UpdaterError::install(format!("Extraction task failed: {}", e)))??;

        let marker = bundle_dir.join(CURRENT_BUNDLE_MARKER);
        tokio::fs::write(&marker, &version)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "write", &marker.display().to_string()))?;
        tracing::info!("[Package] Bundle {} installed to {}", version, target.display());
        Ok(())
    }

    async fn manual_install_package(&self, event: &DownloadedEvent, build_number: u32) -> Result<(), UpdaterError> {
        let package = downloaded_path(event)?;
        ensure_exists(&package).await?;
        tracing::info!("[Package] Revealing {} for manual install (build {})", package.display(), build_number);
        reveal_in_file_manager(&package)
            .map_err(|e| UpdaterError::install(format!("Failed to open file manager: {}", e)))
    }

    async fn clear_package(&self) -> Result<(), UpdaterError> {
        for dir in [&self.config.staging_dir, &self.config.bundle_dir] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => tracing::info!("[Package] Cleared {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(UpdaterError::from_io(&e, "remove_dir", &dir.display().to_string())),
            }
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════
// 미지원 플랫폼
// ══════════════════════════════════════════════════════

/// 패키지 업데이트를 지원하지 않는 플랫폼(웹/확장)용
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPackageBackend;

fn unsupported() -> UpdaterError {
    UpdaterError::Config {
        message: "Package updates are not supported on this platform".to_string(),
    }
}

#[async_trait]
impl PackageBackend for NoopPackageBackend {
    async fn download_package(
        &self,
        _file_type: UpdateFileType,
        _params: &DownloadedEvent,
    ) -> Result<Option<DownloadResult>, UpdaterError> {
        Ok(None)
    }

    async fn download_asc(&self, _: UpdateFileType, _: &DownloadedEvent) -> Result<(), UpdaterError> {
        Err(unsupported())
    }

    async fn verify_asc(&self, _: UpdateFileType, _: &DownloadedEvent) -> Result<(), UpdaterError> {
        Err(unsupported())
    }

    async fn verify_package(&self, _: UpdateFileType, _: &DownloadedEvent) -> Result<(), UpdaterError> {
        Err(unsupported())
    }

    async fn install_package(&self, _: &UpdateInfo) -> Result<(), UpdaterError> {
        Err(unsupported())
    }

    async fn install_bundle(&self, _: &DownloadedEvent) -> Result<(), UpdaterError> {
        Err(unsupported())
    }

    async fn manual_install_package(&self, _: &DownloadedEvent, _: u32) -> Result<(), UpdaterError> {
        Err(unsupported())
    }

    async fn clear_package(&self) -> Result<(), UpdaterError> {
        Ok(())
    }
}

// ══════════════════════════════════════════════════════
// 헬퍼
// ══════════════════════════════════════════════════════

/// ASC 파일 내용
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDigest {
    pub digest: String,
    pub signature: Vec<u8>,
}

pub fn parse_asc(content: &[u8]) -> Result<SignedDigest, UpdaterError> {
    if content.len() > MAX_SIGNATURE_BYTES {
        return Err(UpdaterError::signature("Signature file too large"));
    }
    let text = std::str::from_utf8(content)
        .map_err(|e| UpdaterError::signature(format!("Invalid signature file: {}", e)))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let (Some(digest), Some(signature)) = (lines.next(), lines.next()) else {
        return Err(UpdaterError::signature("Empty signature file"));
    };
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(UpdaterError::signature("Signature file does not carry a SHA-256 digest"));
    }
    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature)
        .map_err(|e| UpdaterError::signature(format!("Invalid signature encoding: {}", e)))?;
    Ok(SignedDigest { digest: digest.to_ascii_lowercase(), signature })
}

/// 다이제스트 서명 검증
pub fn verify_digest_signature(signed: &SignedDigest, public_key_base64: &str) -> Result<(), UpdaterError> {
    let signature = Signature::from_slice(&signed.signature)
        .map_err(|e| UpdaterError::signature(format!("Invalid signature length: {}", e)))?;
    let key_raw = base64::engine::general_purpose::STANDARD
        .decode(public_key_base64.trim())
        .map_err(|e| UpdaterError::signature(format!("Invalid public key encoding: {}", e)))?;
    let key_bytes: [u8; 32] = key_raw
        .as_slice()
        .try_into()
        .map_err(|_| UpdaterError::signature("Invalid public key length"))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| UpdaterError::signature(format!("Invalid public key: {}", e)))?;
    key.verify_strict(signed.digest.as_bytes(), &signature)
        .map_err(|_| UpdaterError::signature("UPDATE_SIGNATURE_VERIFICATION_FAILED_ALERT_TEXT"))
}

/// 파일 SHA-256 (hex)
pub fn sha256_file(path: &Path) -> Result<String, UpdaterError> {
    let mut file = std::fs::File::open(path).map_err(|e| UpdaterError::from_io(&e, "open", &path.display().to_string()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|e| UpdaterError::from_io(&e, "read", &path.display().to_string()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

async fn sha256_file_blocking(path: PathBuf) -> Result<String, UpdaterError> {
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| UpdaterError::package(format!("Hash task failed: {}", e)))?
}

fn downloaded_path(event: &DownloadedEvent) -> Result<PathBuf, UpdaterError> {
    event
        .downloaded_file
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| UpdaterError::missing_artifact(None))
}

async fn ensure_exists(path: &Path) -> Result<(), UpdaterError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(()),
        Err(e) => Err(UpdaterError::from_io(&e, "stat", &path.display().to_string())),
    }
}

fn asc_path(package: &Path) -> PathBuf {
    let mut name = package.as_os_str().to_owned();
    name.push(".asc");
    PathBuf::from(name)
}

fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(|c| c == '?' || c == '#').next()?;
    path.rsplit('/').next().and_then(single_segment).map(str::to_string)
}

/// 서버가 준 값을 디렉터리 이름 하나로만 허용 (`..`, 절대 경로, 구분자 포함 거부)
fn single_segment(value: &str) -> Option<&str> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) if !value.contains(['/', '\\']) => Some(value),
        _ => None,
    }
}

/// zip을 대상 디렉터리에 압축 해제. 디렉터리 밖을 가리키는 항목은 거부
fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<(), UpdaterError> {
    let fs_err = |e: std::io::Error, op: &str, p: &Path| UpdaterError::from_io(&e, op, &p.display().to_string());
    std::fs::create_dir_all(target_dir).map_err(|e| fs_err(e, "create_dir", target_dir))?;

    let file = std::fs::File::open(archive_path).map_err(|e| fs_err(e, "open", archive_path))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| UpdaterError::install(format!("Invalid bundle archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| UpdaterError::install(format!("Invalid bundle entry: {}", e)))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(UpdaterError::install(format!("Unsafe path in bundle: {}", entry.name())));
        };
        let out_path = target_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| fs_err(e, "create_dir", &out_path))?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| fs_err(e, "create_dir", parent))?;
            }
            let mut outfile = std::fs::File::create(&out_path).map_err(|e| fs_err(e, "create", &out_path))?;
            std::io::copy(&mut entry, &mut outfile).map_err(|e| fs_err(e, "write", &out_path))?;
        }
    }
    Ok(())
}

/// 설치 파일 실행 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallerKind {
    /// 실행 파일 (.exe, .AppImage, 확장자 없음). 유닉스에서는 실행 권한을 먼저 준다
    Executable,
    /// Windows Installer 패키지
    Msi,
    /// 디스크 이미지/시스템 패키지. OS 기본 핸들러로 연다
    SystemOpen,
}

impl InstallerKind {
    fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "msi" => InstallerKind::Msi,
            "dmg" | "pkg" | "deb" | "rpm" | "zip" => InstallerKind::SystemOpen,
            _ => InstallerKind::Executable,
        }
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}

fn launch_installer(kind: InstallerKind, path: &Path) -> std::io::Result<()> {
    match kind {
        InstallerKind::Executable => {
            #[cfg(unix)]
            make_executable(path)?;
            std::process::Command::new(path).spawn()?;
        }
        InstallerKind::Msi => {
            std::process::Command::new("msiexec").arg("/i").arg(path).spawn()?;
        }
        InstallerKind::SystemOpen => {
            #[cfg(target_os = "windows")]
            std::process::Command::new("explorer").arg(path).spawn()?;
            #[cfg(target_os = "macos")]
            std::process::Command::new("open").arg(path).spawn()?;
            #[cfg(not(any(target_os = "windows", target_os = "macos")))]
            std::process::Command::new("xdg-open").arg(path).spawn()?;
        }
    }
    Ok(())
}

fn reveal_in_file_manager(path: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("explorer")
            .arg(format!("/select,{}", path.display()))
            .spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-R").arg(path).spawn()?;
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let dir = path.parent().unwrap_or(path);
        std::process::Command::new("xdg-open").arg(dir).spawn()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use std::io::Write;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn public_key_text() -> String {
        base64::engine::general_purpose::STANDARD.encode(signing_key().verifying_key().to_bytes())
    }

    fn asc_for(digest: &str) -> String {
        let signature = signing_key().sign(digest.as_bytes());
        format!(
            "{}\n{}\n",
            digest,
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
        )
    }

    fn backend(dir: &Path) -> FsPackageBackend {
        FsPackageBackend::new(FsPackageConfig {
            staging_dir: dir.join("staging"),
            bundle_dir: dir.join("bundles"),
            public_key_base64: Some(public_key_text()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn staged_package(dir: &Path, content: &[u8]) -> (PathBuf, DownloadedEvent) {
        let path = dir.join("wallet-5.3.0.bin");
        std::fs::write(&path, content).unwrap();
        let event = DownloadedEvent {
            downloaded_file: Some(path.display().to_string()),
            latest_version: Some("5.3.0".into()),
            ..Default::default()
        };
        (path, event)
    }

    #[test]
    fn signature_round_trip() {
        let digest = hex::encode(Sha256::digest(b"payload"));
        let signed = parse_asc(asc_for(&digest).as_bytes()).unwrap();
        verify_digest_signature(&signed, &public_key_text()).unwrap();
    }

    #[test]
    fn rejects_signature_over_other_digest() {
        let digest = hex::encode(Sha256::digest(b"payload"));
        let other = hex::encode(Sha256::digest(b"other"));
        let forged = asc_for(&other).replace(&other, &digest);
        let signed = parse_asc(forged.as_bytes()).unwrap();
        let err = verify_digest_signature(&signed, &public_key_text()).unwrap_err();
        assert!(matches!(err, UpdaterError::SignatureVerificationFailure { .. }));
    }

    #[test]
    fn rejects_empty_or_malformed_asc() {
        assert!(parse_asc(b"  \n").is_err());
        assert!(parse_asc(b"not-a-digest\nAAAA\n").is_err());
    }

    #[tokio::test]
    async fn verify_package_matches_signed_digest() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let (path, event) = staged_package(dir.path(), b"installer bytes");
        let digest = sha256_file(&path).unwrap();
        std::fs::write(asc_path(&path), asc_for(&digest)).unwrap();

        backend.verify_asc(UpdateFileType::AppShell, &event).await.unwrap();
        backend.verify_package(UpdateFileType::AppShell, &event).await.unwrap();

        // 서명 이후 파일이 바뀌면 패키지 검증 실패
        std::fs::write(&path, b"tampered").unwrap();
        let err = backend.verify_package(UpdateFileType::AppShell, &event).await.unwrap_err();
        assert!(matches!(err, UpdaterError::PackageVerificationFailure { .. }));
    }

    #[tokio::test]
    async fn bundle_asc_written_from_release_info() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let (path, mut event) = staged_package(dir.path(), b"bundle bytes");
        let digest = sha256_file(&path).unwrap();
        let signature = signing_key().sign(digest.as_bytes());
        event.sha256 = Some(digest.clone());
        event.signature = Some(base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()));

        backend.download_asc(UpdateFileType::JsBundle, &event).await.unwrap();
        backend.verify_asc(UpdateFileType::JsBundle, &event).await.unwrap();
        backend.verify_package(UpdateFileType::JsBundle, &event).await.unwrap();
    }

    #[tokio::test]
    async fn missing_artifact_reports_not_found_package() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let event = DownloadedEvent {
            downloaded_file: Some(dir.path().join("gone.bin").display().to_string()),
            ..Default::default()
        };
        let err = backend.manual_install_package(&event, 1).await.unwrap_err();
        assert_eq!(err.error_code(), crate::error::NOT_FOUND_PACKAGE);

        let err = backend.install_bundle(&DownloadedEvent::default()).await.unwrap_err();
        assert!(err.is_missing_artifact());
    }

    #[tokio::test]
    async fn bundle_install_extracts_zip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let archive = dir.path().join("bundle.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::FileOptions::default();
            zip.start_file("main.jsbundle", options).unwrap();
            zip.write_all(b"console.log('v4')").unwrap();
            zip.finish().unwrap();
        }
        let event = DownloadedEvent {
            downloaded_file: Some(archive.display().to_string()),
            bundle_version: Some("4".into()),
            ..Default::default()
        };

        backend.install_bundle(&event).await.unwrap();
        let extracted = dir.path().join("bundles").join("4").join("main.jsbundle");
        assert_eq!(std::fs::read_to_string(extracted).unwrap(), "console.log('v4')");
        let marker = std::fs::read_to_string(dir.path().join("bundles").join(CURRENT_BUNDLE_MARKER)).unwrap();
        assert_eq!(marker, "4");
    }

    #[tokio::test]
    async fn download_without_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = backend(dir.path())
            .download_package(UpdateFileType::AppShell, &DownloadedEvent::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::DownloadFailure { .. }));
    }

    #[tokio::test]
    async fn clear_package_ignores_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        std::fs::create_dir_all(dir.path().join("staging").join("5.3.0")).unwrap();
        backend.clear_package().await.unwrap();
        assert!(!dir.path().join("staging").exists());
        backend.clear_package().await.unwrap();
    }

    #[tokio::test]
    async fn bundle_version_cannot_leave_bundle_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let archive = dir.path().join("bundle.zip");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
            zip.start_file("main.jsbundle", zip::write::FileOptions::default()).unwrap();
            zip.write_all(b"escaped").unwrap();
            zip.finish().unwrap();
        }

        let absolute = dir.path().join("abs").display().to_string();
        for version in ["../escaped", "..", "a/b", absolute.as_str()] {
            let event = DownloadedEvent {
                downloaded_file: Some(archive.display().to_string()),
                bundle_version: Some(version.to_string()),
                ..Default::default()
            };
            let err = backend.install_bundle(&event).await.unwrap_err();
            assert!(matches!(err, UpdaterError::InstallFailure { .. }), "{}: {:?}", version, err);
        }
        assert!(!dir.path().join("escaped").exists());
        assert!(!dir.path().join("abs").exists());
        assert!(!dir.path().join("bundles").join(CURRENT_BUNDLE_MARKER).exists());
    }

    #[test]
    fn staged_path_stays_in_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let url = "https://x.io/a/wallet.bin";

        for version in ["../evil", "/etc/evil", "5.3.0/../../x", "."] {
            let params = DownloadedEvent {
                latest_version: Some(version.to_string()),
                ..Default::default()
            };
            let err = backend.staged_path(UpdateFileType::AppShell, &params, url).unwrap_err();
            assert!(matches!(err, UpdaterError::DownloadFailure { .. }), "{}", version);
        }

        let params = DownloadedEvent {
            latest_version: Some("5.3.0".into()),
            ..Default::default()
        };
        let staged = backend.staged_path(UpdateFileType::AppShell, &params, url).unwrap();
        assert_eq!(staged, dir.path().join("staging").join("5.3.0").join("wallet.bin"));
    }

    #[test]
    fn installer_kind_by_extension() {
        assert_eq!(InstallerKind::for_path(Path::new("wallet-5.3.0.dmg")), InstallerKind::SystemOpen);
        assert_eq!(InstallerKind::for_path(Path::new("wallet-5.3.0.DEB")), InstallerKind::SystemOpen);
        assert_eq!(InstallerKind::for_path(Path::new("wallet-5.3.0.msi")), InstallerKind::Msi);
        assert_eq!(InstallerKind::for_path(Path::new("wallet-5.3.0.AppImage")), InstallerKind::Executable);
        assert_eq!(InstallerKind::for_path(Path::new("wallet-setup.exe")), InstallerKind::Executable);
    }

    #[cfg(unix)]
    #[test]
    fn downloaded_installer_gets_exec_bit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = staged_package(dir.path(), b"#!/bin/sh\n");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        make_executable(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn file_name_from_download_url() {
        assert_eq!(file_name_from_url("https://x.io/a/wallet-5.3.0.dmg?sig=1").as_deref(), Some("wallet-5.3.0.dmg"));
        assert_eq!(file_name_from_url("https://x.io/a/"), None);
        assert_eq!(file_name_from_url("https://x.io/a/.."), None);
    }

    #[test]
    fn download_result_overrides_params() {
        let params = DownloadedEvent {
            download_url: Some("https://x.io/a.zip".into()),
            latest_version: Some("5.3.0".into()),
            ..Default::default()
        };
        let merged = DownloadResult {
            downloaded_file: "/tmp/a.zip".into(),
            download_url: None,
            file_size: Some(10),
        }
        .merge_into(params);
        assert_eq!(merged.downloaded_file.as_deref(), Some("/tmp/a.zip"));
        assert_eq!(merged.download_url.as_deref(), Some("https://x.io/a.zip"));
        assert_eq!(merged.latest_version.as_deref(), Some("5.3.0"));
        assert_eq!(merged.file_size, Some(10));
    }
}
