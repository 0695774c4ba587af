use std::time::Duration;

use crate::error::{LauncherError, Result};

const RETRY_DELAY: Duration = Duration::from_millis(50);

#[cfg(windows)]
pub type PipeStream = tokio::net::windows::named_pipe::NamedPipeClient;

#[cfg(unix)]
pub type PipeStream = tokio::net::UnixStream;

/// Name of the application's interop pipe for a session and package.
#[cfg(windows)]
pub fn pipe_name(session_id: u32, package_sid: &str) -> String {
    format!(
        r"\\.\pipe\Sessions\{session_id}\AppContainerNamedObjects\{package_sid}\FilesInteropService_ServerPipe"
    )
}

/// Name of the application's interop socket for a session and package.
#[cfg(unix)]
pub fn pipe_name(session_id: u32, package_sid: &str) -> String {
    let file = if package_sid.is_empty() {
        format!("FilesInteropService_ServerPipe.{session_id}")
    } else {
        format!("FilesInteropService_ServerPipe.{session_id}.{package_sid}")
    };
    std::env::temp_dir().join(file).to_string_lossy().into_owned()
}

/// Session of the current process.
#[cfg(windows)]
pub fn current_session_id() -> u32 {
    use windows::Win32::System::RemoteDesktop::ProcessIdToSessionId;
    use windows::Win32::System::Threading::GetCurrentProcessId;

    let mut session_id = 0u32;
    // SAFETY: the out pointer refers to a live local.
    let result = unsafe { ProcessIdToSessionId(GetCurrentProcessId(), &mut session_id) };
    if let Err(e) = result {
        tracing::warn!(target: "ipc", error = %e, "Failed to query session id, using 0");
        return 0;
    }
    session_id
}

#[cfg(unix)]
pub fn current_session_id() -> u32 {
    0
}

fn is_retryable(err: &std::io::Error) -> bool {
    #[cfg(windows)]
    {
        const ERROR_PIPE_BUSY: i32 = 231;
        if err.raw_os_error() == Some(ERROR_PIPE_BUSY) {
            return true;
        }
    }
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

/// Opens the client end in message read mode, matching the server. A message larger
/// than the read buffer arrives over several reads, which the codec reassembles.
#[cfg(windows)]
fn try_open(name: &str) -> std::io::Result<PipeStream> {
    use tokio::net::windows::named_pipe::{ClientOptions, PipeMode};
    ClientOptions::new().pipe_mode(PipeMode::Message).open(name)
}

#[cfg(unix)]
async fn try_open(name: &str) -> std::io::Result<PipeStream> {
    tokio::net::UnixStream::connect(name).await
}

/// Connects to the pipe, retrying while the server is busy or not yet listening.
pub async fn connect(name: &str, timeout: Duration) -> Result<PipeStream> {
    let attempt = async {
        loop {
            #[cfg(windows)]
            let opened = try_open(name);
            #[cfg(unix)]
            let opened = try_open(name).await;

            match opened {
                Ok(stream) => return Ok(stream),
                Err(e) if is_retryable(&e) => {
                    tracing::trace!(target: "ipc", pipe = name, error = %e, "Pipe not ready, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(source) => {
                    return Err(LauncherError::PipeConnect {
                        name: name.to_string(),
                        source,
                    });
                }
            }
        }
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(LauncherError::ConnectTimeout(name.to_string())),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_name_includes_session() {
        let name = pipe_name(3, "S-1-15-2-1");
        assert!(name.ends_with("FilesInteropService_ServerPipe.3.S-1-15-2-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_when_nobody_listens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        let err = connect(path.to_str().unwrap(), Duration::from_secs(15))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ConnectTimeout(_)));
    }

    #[tokio::test]
    async fn test_connect_to_listening_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        connect(path.to_str().unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        accept.await.unwrap().unwrap();
    }
}

#[cfg(all(test, windows))]
mod windows_tests {
    use super::*;
    use crate::ipc::JsonMessageCodec;
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn test_message_mode_pipe_delivers_each_message() {
        let name = format!(r"\\.\pipe\files-launcher-test-{}", uuid::Uuid::new_v4());
        let mut server = ServerOptions::new()
            .pipe_mode(PipeMode::Message)
            .first_pipe_instance(true)
            .create(&name)
            .unwrap();

        let client = connect(&name, Duration::from_secs(5)).await.unwrap();
        server.connect().await.unwrap();
        server.write_all(br#"{"Arguments":"Elevate"}"#).await.unwrap();
        server
            .write_all(format!(r#"{{"Arguments":"LaunchApp","Application":"{}"}}"#, "x".repeat(2_000)).as_bytes())
            .await
            .unwrap();

        let mut frames = FramedRead::new(client, JsonMessageCodec::default());
        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(first.arguments(), Some("Elevate"));
        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(second.get_str("Application").map(str::len), Some(2_000));
    }
}
