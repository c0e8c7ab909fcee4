//! Shared fixtures for gateway integration tests.
//!
//! Provides a host installation laid out on disk, scripted stand-ins for the
//! engine's submit program, and a minimal control-channel server, so the
//! lifecycle can be exercised end to end without a Java runtime.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spark_gateway::environment::EnvironmentPreparer;
use spark_gateway::gateway::channel::{ChannelFuture, ControlChannel};
use spark_gateway::gateway::conn_info::GatewayEndpoint;
use spark_gateway::gateway::launcher::LauncherSettings;
use spark_gateway::models::host::HostInstall;
use spark_gateway::process_tree::{PlatformTreeKiller, ProcessTreeKiller};
use spark_gateway::{GatewayError, Result};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Shared secret used by every fake gateway.
pub const SECRET: &str = "test-secret";

/// A host installation with its runtime directories created.
pub struct HostFixture {
    pub dir: TempDir,
    pub host: HostInstall,
}

impl HostFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = HostInstall::new(dir.path());
        for path in [host.bundled_spark_home(), host.hadoop_home(), host.java_home()] {
            fs::create_dir_all(path).expect("create runtime dir");
        }
        Self { dir, host }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Preparer isolated from the test process environment.
    pub fn preparer(&self) -> EnvironmentPreparer {
        EnvironmentPreparer::with_inherited(self.host.clone(), Vec::<(String, OsString)>::new())
    }
}

/// Fast launcher tuning pointing at `script`.
pub fn fast_settings(script: PathBuf) -> LauncherSettings {
    LauncherSettings {
        submit_command: Some(script),
        startup_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(20),
    }
}

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

/// Script that records its PID, forks a helper, advertises `endpoint` and
/// then idles like a running gateway.
///
/// PIDs land in `<dir>/gateway.pid` and `<dir>/helper.pid`; the arguments it
/// was called with land in `<dir>/args.txt`.
#[cfg(unix)]
pub fn advertising_script(dir: &Path, endpoint: &GatewayEndpoint) -> PathBuf {
    let body = format!(
        r#"echo $$ > "{dir}/gateway.pid"
printf '%s\n' "$@" > "{dir}/args.txt"
echo "JAVA_HOME=$JAVA_HOME" > "{dir}/env.txt"
echo "PYSPARK_GATEWAY_PORT=${{PYSPARK_GATEWAY_PORT:-unset}}" >> "{dir}/env.txt"
sleep 30 &
echo $! > "{dir}/helper.pid"
printf '{payload}' > "$_PYSPARK_DRIVER_CONN_INFO_PATH.tmp"
mv "$_PYSPARK_DRIVER_CONN_INFO_PATH.tmp" "$_PYSPARK_DRIVER_CONN_INFO_PATH"
exec sleep 30"#,
        dir = dir.display(),
        payload = octal_escape(&endpoint.encode()),
    );
    write_script(dir, "spark-submit", &body)
}

/// Script that records its PID and never advertises a port.
#[cfg(unix)]
pub fn silent_script(dir: &Path) -> PathBuf {
    let body = format!(
        "echo $$ > \"{dir}/gateway.pid\"\nexec sleep 30",
        dir = dir.display()
    );
    write_script(dir, "spark-submit", &body)
}

fn octal_escape(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "\\{byte:03o}");
        out
    })
}

/// Read a PID file written by a fixture script.
pub fn read_pid(path: &Path) -> u32 {
    fs::read_to_string(path)
        .expect("pid file")
        .trim()
        .parse()
        .expect("numeric pid")
}

/// Poll until `pid` no longer names a live process.
#[cfg(unix)]
pub async fn wait_until_gone(pid: u32) -> bool {
    for _ in 0..100 {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).expect("pid fits in i32");
    match kill(Pid::from_raw(raw), None) {
        Err(Errno::ESRCH) => false,
        _ => !is_zombie(pid),
    }
}

/// Killed orphans linger as zombies until their new parent reaps them.
#[cfg(unix)]
fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
        stat.rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z'))
    })
}

/// How the fake gateway behaves on an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayBehavior {
    Answer,
    Fail,
    Hang,
    /// Accept the socket but never answer anything, not even authentication.
    Mute,
}

/// Loopback server speaking the subset of the gateway protocol the manager
/// uses: authenticate, probe, shut down.
pub struct FakeGateway {
    pub endpoint: GatewayEndpoint,
    pub probes: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeGateway {
    pub async fn spawn(behavior: GatewayBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let probes = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));

        let task = {
            let probes = Arc::clone(&probes);
            let shutdowns = Arc::clone(&shutdowns);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(
                        stream,
                        behavior,
                        Arc::clone(&probes),
                        Arc::clone(&shutdowns),
                    ));
                }
            })
        };

        Self {
            endpoint: GatewayEndpoint {
                port,
                secret: SECRET.to_owned(),
            },
            probes,
            shutdowns,
            task,
        }
    }

    pub async fn wait_for_shutdown(&self) -> bool {
        for _ in 0..100 {
            if self.shutdowns.load(Ordering::SeqCst) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    behavior: GatewayBehavior,
    probes: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    if behavior == GatewayBehavior::Mute {
        while let Ok(Some(_)) = lines.next_line().await {}
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        match line.as_str() {
            "A" => {
                let Ok(Some(given)) = lines.next_line().await else {
                    return;
                };
                if given == SECRET {
                    let _ = write.write_all(b"!yv\n").await;
                } else {
                    let _ = write.write_all(b"!xauthentication failed\n").await;
                    return;
                }
            }
            "c" => {
                loop {
                    match lines.next_line().await {
                        Ok(Some(part)) if part == "e" => break,
                        Ok(Some(_)) => {}
                        _ => return,
                    }
                }
                probes.fetch_add(1, Ordering::SeqCst);
                match behavior {
                    GatewayBehavior::Answer => {
                        let _ = write.write_all(b"!yro0\n").await;
                    }
                    GatewayBehavior::Fail => {
                        let _ = write.write_all(b"!xprobe refused\n").await;
                    }
                    GatewayBehavior::Hang | GatewayBehavior::Mute => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                }
            }
            "s" => {
                let _ = lines.next_line().await;
                shutdowns.fetch_add(1, Ordering::SeqCst);
                return;
            }
            _ => {
                let _ = write.write_all(b"!xunknown command\n").await;
            }
        }
    }
}

/// Control channel double that records calls.
#[derive(Default)]
pub struct RecordingChannel {
    pub probes: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub fail_shutdown: bool,
    pub hang_shutdown: bool,
}

impl ControlChannel for RecordingChannel {
    fn probe(&mut self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn shutdown(&mut self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.hang_shutdown {
                std::future::pending::<()>().await;
            }
            if self.fail_shutdown {
                return Err(GatewayError::Teardown("refused".into()));
            }
            Ok(())
        })
    }
}

/// Tree killer that records every PID it is asked to kill.
#[derive(Default)]
pub struct RecordingKiller {
    pub calls: Mutex<Vec<u32>>,
    pub fail: bool,
}

impl RecordingKiller {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl ProcessTreeKiller for RecordingKiller {
    fn kill_tree(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.calls.lock().expect("calls lock").push(pid);
            if self.fail {
                return Err(GatewayError::Teardown("kill refused".into()));
            }
            PlatformTreeKiller.kill_tree(pid).await
        })
    }
}
