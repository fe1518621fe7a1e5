//! Scoped access to network-backed replica roots
//!
//! A [`ShareSession`] connects every root of a run before the run starts and
//! disconnects them afterwards. [`ShareSession::close`] is the normal exit
//! path; dropping an open session still schedules the disconnects on the
//! current runtime.

use async_trait::async_trait;
use filesync_config::ShareConfig;
use filesync_types::{Error, RemoteCredentials, Result, ShareConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// [`ShareConnector`] running configured external commands
#[derive(Debug, Clone)]
pub struct CommandShareConnector {
    connect_command: Vec<String>,
    disconnect_command: Vec<String>,
}

impl CommandShareConnector {
    /// Create a connector from command templates
    pub fn new(connect_command: Vec<String>, disconnect_command: Vec<String>) -> Result<Self> {
        if connect_command.first().map_or(true, String::is_empty)
            || disconnect_command.first().map_or(true, String::is_empty)
        {
            return Err(Error::config(
                "Share connect and disconnect commands must name a program",
            ));
        }
        Ok(Self {
            connect_command,
            disconnect_command,
        })
    }

    /// Create a connector from configuration, `None` when no commands are set
    pub fn from_config(config: &ShareConfig) -> Result<Option<Self>> {
        if !config.is_configured() {
            return Ok(None);
        }
        Self::new(
            config.connect_command.clone(),
            config.disconnect_command.clone(),
        )
        .map(Some)
    }

    async fn execute(template: &[String], path: &Path, credentials: Option<&RemoteCredentials>) -> Result<()> {
        let Some((program, args)) = template.split_first() else {
            return Err(Error::config("Share command is empty"));
        };
        let args: Vec<String> = args
            .iter()
            .map(|arg| render(arg, path, credentials))
            .collect();

        debug!("Running share command '{}' for '{}'", program, path.display());
        let output = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::remote_access(format!("Failed to run '{}' for '{}': {}", program, path.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::remote_access(format!(
                "'{}' for '{}' exited with {}: {}",
                program,
                path.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ShareConnector for CommandShareConnector {
    async fn connect(&self, path: &Path, credentials: &RemoteCredentials) -> Result<()> {
        Self::execute(&self.connect_command, path, Some(credentials)).await
    }

    async fn disconnect(&self, path: &Path) -> Result<()> {
        Self::execute(&self.disconnect_command, path, None).await
    }
}

/// Substitute `{path}`, `{user}`, `{domain}` and `{password}` in `template`
pub fn render(template: &str, path: &Path, credentials: Option<&RemoteCredentials>) -> String {
    let (user, password, domain) = credentials.map_or(("", "", ""), |c| {
        (
            c.user.as_str(),
            c.password.as_str(),
            c.domain.as_deref().unwrap_or_default(),
        )
    });

    template
        .replace("{path}", &path.to_string_lossy())
        .replace("{user}", user)
        .replace("{domain}", domain)
        .replace("{password}", password)
}

/// Connected shares of one run
pub struct ShareSession {
    connector: Arc<dyn ShareConnector>,
    connected: Vec<PathBuf>,
}

impl std::fmt::Debug for ShareSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareSession")
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl ShareSession {
    /// Connect each of `paths`. On failure every path touched so far is
    /// disconnected again before the error is returned.
    pub async fn open<I, P>(
        connector: Arc<dyn ShareConnector>,
        paths: I,
        credentials: &RemoteCredentials,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut session = Self {
            connector,
            connected: Vec::new(),
        };

        for path in paths {
            let path = path.into();
            if session.connected.contains(&path) {
                continue;
            }
            let connected = session.connector.connect(&path, credentials).await;
            // Disconnect must tolerate a partial connect, so track it either way.
            session.connected.push(path.clone());
            if let Err(e) = connected {
                warn!("Failed to connect '{}': {}", path.display(), e);
                if let Err(close_error) = session.close().await {
                    warn!("Cleanup after failed connect also failed: {}", close_error);
                }
                return Err(e);
            }
            info!("Connected share '{}'", path.display());
        }

        Ok(session)
    }

    /// Paths connected by this session
    pub fn paths(&self) -> &[PathBuf] {
        &self.connected
    }

    /// Disconnect every path, in reverse order. All paths are attempted; the
    /// first failure is returned.
    pub async fn close(mut self) -> Result<()> {
        let connected = std::mem::take(&mut self.connected);
        disconnect_all(self.connector.as_ref(), connected).await
    }
}

async fn disconnect_all(connector: &dyn ShareConnector, paths: Vec<PathBuf>) -> Result<()> {
    let mut first_error = None;
    for path in paths.into_iter().rev() {
        match connector.disconnect(&path).await {
            Ok(()) => info!("Disconnected share '{}'", path.display()),
            Err(e) => {
                warn!("Failed to disconnect '{}': {}", path.display(), e);
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl Drop for ShareSession {
    fn drop(&mut self) {
        if self.connected.is_empty() {
            return;
        }

        let connected = std::mem::take(&mut self.connected);
        let connector = Arc::clone(&self.connector);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Share session dropped while open, disconnecting in background");
                handle.spawn(async move {
                    let _ = disconnect_all(connector.as_ref(), connected).await;
                });
            }
            Err(_) => warn!(
                "Share session dropped outside a runtime, {} shares left connected",
                connected.len()
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Connector recording every call
    #[derive(Debug, Default)]
    pub(crate) struct RecordingConnector {
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) fail_connect: Option<PathBuf>,
    }

    impl RecordingConnector {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ShareConnector for RecordingConnector {
        async fn connect(&self, path: &Path, _credentials: &RemoteCredentials) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("connect {}", path.display()));
            if self.fail_connect.as_deref() == Some(path) {
                return Err(Error::remote_access("logon failure"));
            }
            Ok(())
        }

        async fn disconnect(&self, path: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("disconnect {}", path.display()));
            Ok(())
        }
    }

    fn credentials() -> RemoteCredentials {
        RemoteCredentials::new("svc", "secret").with_domain("CORP")
    }

    #[tokio::test]
    async fn test_session_brackets_paths() {
        let connector = Arc::new(RecordingConnector::default());
        let session = ShareSession::open(connector.clone(), ["/a", "/b", "/a"], &credentials())
            .await
            .unwrap();
        assert_eq!(session.paths().len(), 2);

        session.close().await.unwrap();

        assert_eq!(
            connector.calls(),
            vec!["connect /a", "connect /b", "disconnect /b", "disconnect /a"]
        );
    }

    #[tokio::test]
    async fn test_failed_connect_releases_everything() {
        let connector = Arc::new(RecordingConnector {
            fail_connect: Some(PathBuf::from("/b")),
            ..Default::default()
        });

        let err = ShareSession::open(connector.clone(), ["/a", "/b"], &credentials())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), filesync_types::ErrorKind::RemoteAccess);
        assert_eq!(
            connector.calls(),
            vec!["connect /a", "connect /b", "disconnect /b", "disconnect /a"]
        );
    }

    #[tokio::test]
    async fn test_dropped_session_disconnects() {
        let connector = Arc::new(RecordingConnector::default());
        let session = ShareSession::open(connector.clone(), ["/a"], &credentials())
            .await
            .unwrap();

        drop(session);
        for _ in 0..10 {
            if connector.calls().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(connector.calls(), vec!["connect /a", "disconnect /a"]);
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let rendered = render(
            "{domain}\\{user}:{password}@{path}",
            Path::new("/mnt/share"),
            Some(&credentials()),
        );
        assert_eq!(rendered, "CORP\\svc:secret@/mnt/share");

        assert_eq!(render("/user:{user}", Path::new("x"), None), "/user:");
    }

    #[test]
    fn test_connector_requires_programs() {
        assert!(CommandShareConnector::new(Vec::new(), vec!["umount".to_string()]).is_err());
        assert!(CommandShareConnector::from_config(&ShareConfig::default())
            .unwrap()
            .is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_status_is_checked() {
        let ok = CommandShareConnector::new(vec!["true".to_string()], vec!["true".to_string()]).unwrap();
        ok.connect(Path::new("/mnt"), &credentials()).await.unwrap();
        ok.disconnect(Path::new("/mnt")).await.unwrap();

        let failing =
            CommandShareConnector::new(vec!["false".to_string()], vec!["true".to_string()]).unwrap();
        let err = failing.connect(Path::new("/mnt"), &credentials()).await.unwrap_err();
        assert_eq!(err.kind(), filesync_types::ErrorKind::RemoteAccess);
    }
}
