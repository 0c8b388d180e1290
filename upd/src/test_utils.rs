//! Test utilities for handler and application tests.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};

use crate::config::{Config, StorageConfig};
use crate::limits::UploadLimiter;
use crate::storage::Storage;
use crate::{AppState, Application, build_router};

/// Config storing uploads in `root`, bound to an ephemeral port.
pub fn create_test_config(root: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        storage: StorageConfig {
            root: root.to_path_buf(),
            create_root: false,
        },
        ..Default::default()
    }
}

pub async fn create_test_app(config: Config) -> TestServer {
    Application::new(config)
        .await
        .expect("Failed to create application")
        .into_test_server()
}

/// State built the same way [`Application::new`] does, for tests that need to reach into it.
pub fn create_test_state(config: Config) -> AppState {
    AppState::builder()
        .storage(Storage::from_config(&config))
        .maybe_limiter(UploadLimiter::new(&config.limits.uploads).map(Arc::new))
        .config(config)
        .build()
}

pub fn create_test_server_from_state(state: &AppState) -> TestServer {
    let router = build_router(state).expect("Failed to build router");
    TestServer::new(router.into_make_service()).expect("Failed to create test server")
}

/// Form with a single `file` part, as sent by `curl -F file=@<name>`.
pub fn upload_form(filename: &str, content: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part("file", Part::bytes(content).file_name(filename))
}

/// Sorted names of the entries in `dir`, including temporary spool files.
pub fn stored_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read storage root")
        .map(|entry| entry.expect("Failed to read entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Log output written by the subscriber installed with [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer poisoned")).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records log lines emitted on this thread until the guard is dropped.
///
/// The subscriber is thread-local, so use it from a current-thread runtime (plain `#[tokio::test]`).
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
