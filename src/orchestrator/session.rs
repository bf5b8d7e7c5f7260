//! Flash session service: one active session per device transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::SessionError;
use crate::models::{DeviceHandle, SessionReport};

use super::{FlashEvent, FlashOrchestrator, FlashRequest};

struct ActiveSession {
    transport: String,
    cancel_tx: watch::Sender<bool>,
}

type ActiveMap = Arc<Mutex<HashMap<Uuid, ActiveSession>>>;

fn lock(active: &Mutex<HashMap<Uuid, ActiveSession>>) -> MutexGuard<'_, HashMap<Uuid, ActiveSession>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases a session's transport when its task ends, including by panic or abort.
struct Registration {
    active: ActiveMap,
    id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.id);
    }
}

/// A running session: its id, event stream and final report.
pub struct SessionHandle {
    pub id: Uuid,
    events: Option<mpsc::UnboundedReceiver<FlashEvent>>,
    join: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Take the event stream; only the first call gets it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<FlashEvent>> {
        self.events.take()
    }

    /// Wait for the session to end.
    pub async fn wait(self) -> SessionReport {
        match self.join.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("[Flash] Session {} task aborted: {}", self.id.simple(), e);
                let mut report = SessionReport::new(self.id);
                report.error = Some(format!("session task aborted: {}", e));
                report
            }
        }
    }
}

/// Starts, tracks and cancels flash sessions.
#[derive(Clone)]
pub struct FlashService {
    orchestrator: Arc<FlashOrchestrator>,
    active: ActiveMap,
}

impl FlashService {
    pub fn new(orchestrator: FlashOrchestrator) -> Self {
        FlashService {
            orchestrator: Arc::new(orchestrator),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &FlashOrchestrator {
        &self.orchestrator
    }

    /// Start a session on the current tokio runtime.
    ///
    /// Fails with `DeviceBusy` while another session holds the same transport.
    pub fn start_flash(&self, request: FlashRequest) -> Result<SessionHandle, SessionError> {
        let transport = request.device.transport_key();
        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut active = lock(&self.active);
            if active.values().any(|s| s.transport == transport) {
                log::warn!("[Flash] Refusing second session on {}", transport);
                return Err(SessionError::DeviceBusy(request.device.id.clone()));
            }
            active.insert(
                id,
                ActiveSession {
                    transport: transport.clone(),
                    cancel_tx,
                },
            );
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::clone(&self.orchestrator);
        let registration = Registration {
            active: Arc::clone(&self.active),
            id,
        };
        let join = tokio::spawn(async move {
            let _registration = registration;
            orchestrator.run(id, request, cancel_rx, events_tx).await
        });

        log::info!("[Flash] Session {} registered on {}", id.simple(), transport);
        Ok(SessionHandle {
            id,
            events: Some(events_rx),
            join,
        })
    }

    /// Request cancellation; the running tool is killed and no further
    /// partitions are attempted.
    pub fn cancel(&self, id: Uuid) -> Result<(), SessionError> {
        let active = lock(&self.active);
        let session = active
            .get(&id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        log::warn!("[Flash] Cancel requested for session {}", id.simple());
        session.cancel_tx.send_replace(true);
        Ok(())
    }

    /// Cancel every active session (e.g. on Ctrl-C).
    pub fn cancel_all(&self) -> usize {
        let active = lock(&self.active);
        for session in active.values() {
            session.cancel_tx.send_replace(true);
        }
        active.len()
    }

    pub fn active_sessions(&self) -> Vec<Uuid> {
        lock(&self.active).keys().copied().collect()
    }

    pub fn is_busy(&self, device: &DeviceHandle) -> bool {
        let transport = device.transport_key();
        lock(&self.active).values().any(|s| s.transport == transport)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::models::{SessionStatus, ToolHandle, ToolKind};
    use crate::orchestrator::{manual_entry, FlashPlan};
    use crate::tools::ToolResolver;
    use crate::vendor::Vendor;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(temp: &TempDir) -> FlashService {
        let settings = Settings {
            tools_dir: temp.path().join("tools"),
            loaders_dir: temp.path().join("loaders"),
            scratch_root: temp.path().join("scratch"),
            ..Settings::default()
        };
        let resolver = Arc::new(ToolResolver::new(settings.clone()).unwrap().with_search_dirs(vec![]));
        FlashService::new(FlashOrchestrator::new(settings, resolver))
    }

    fn slow_tool(dir: &Path, name: &str) -> ToolHandle {
        let script = dir.join(format!("slow-mtk-{}", name.replace(':', "_")));
        fs::write(&script, "sleep 30\n").unwrap();
        let mut handle = ToolHandle::executable(ToolKind::MtkClient, &script);
        handle.interpreter = Some("/bin/sh".into());
        handle
    }

    fn request(temp: &TempDir, device_id: &str) -> FlashRequest {
        let image = temp.path().join(format!("boot-{}.img", device_id.replace(':', "_")));
        fs::write(&image, b"img").unwrap();
        let plan = FlashPlan::new(vec![manual_entry("boot", &image)], true).unwrap();
        FlashRequest::plan(DeviceHandle::new(device_id, Vendor::MediaTek), plan)
            .with_tool(slow_tool(temp.path(), device_id))
            .without_reboot()
    }

    #[tokio::test]
    async fn test_second_session_on_same_device_is_busy() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let first = service.start_flash(request(&temp, "usb:1-1")).unwrap();

        let second = service.start_flash(request(&temp, "usb:1-1"));
        assert!(matches!(second, Err(SessionError::DeviceBusy(_))));
        let other = service.start_flash(request(&temp, "usb:1-2")).unwrap();

        service.cancel_all();
        assert_eq!(first.wait().await.status, SessionStatus::Cancelled);
        assert_eq!(other.wait().await.status, SessionStatus::Cancelled);
        assert!(service.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_session() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let handle = service.start_flash(request(&temp, "usb:3-1")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        service.cancel(handle.id).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("cancel must end the session promptly");
        assert_eq!(report.status, SessionStatus::Cancelled);
        assert_eq!(report.partitions.len(), 1);
        assert_eq!(report.rebooted, None);
    }

    #[tokio::test]
    async fn test_aborted_task_releases_device() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let handle = service.start_flash(request(&temp, "usb:6-1")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.join.abort();
        let report = handle.wait().await;
        assert_eq!(report.status, SessionStatus::Failed);
        assert!(report.error.unwrap().contains("aborted"));

        let device = DeviceHandle::new("usb:6-1", Vendor::MediaTek);
        assert!(!service.is_busy(&device));
        let again = service.start_flash(request(&temp, "usb:6-1")).unwrap();
        service.cancel_all();
        assert_eq!(again.wait().await.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        assert!(matches!(
            service.cancel(Uuid::new_v4()),
            Err(SessionError::UnknownSession(_))
        ));
    }
}
