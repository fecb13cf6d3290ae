#![forbid(unsafe_code)]

use crate::entry::framing::{
    parse_request, read_content_length_frame, request_expects_response, write_content_length_json,
};
use crate::probe::{HEALTH_METHOD, HEALTH_OK};
use crate::{JsonRpcRequest, METHOD_NOT_FOUND, json_rpc_error, json_rpc_response};
use gm_storage::Endpoint;
use serde_json::{Value, json};
use std::io::{BufReader, BufWriter};
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;

pub(crate) const INFO_METHOD: &str = "backend_info";
pub(crate) const SHUTDOWN_METHOD: &str = "backend_shutdown";

const WATCHDOG_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub(crate) struct DaemonConfig {
    pub(crate) socket_path: PathBuf,
    pub(crate) data_file: PathBuf,
}

struct DaemonState {
    config: DaemonConfig,
    started: OffsetDateTime,
}

/// Shared backend listener. Exits 0 without binding when another backend already answers.
pub(crate) fn run_socket_daemon(config: DaemonConfig) -> Result<(), Box<dyn std::error::Error>> {
    if UnixStream::connect(&config.socket_path).is_ok() {
        tracing::info!(socket = %config.socket_path.display(), "backend already listening; exiting");
        return Ok(());
    }

    Endpoint::new(&config.socket_path).ensure_directory()?;
    if let Some(parent) = config.data_file.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let Some((listener, identity)) = bind_published(&config.socket_path)? else {
        tracing::info!("lost bind race to a live backend; exiting");
        return Ok(());
    };
    tracing::info!(
        socket = %config.socket_path.display(),
        data_file = %config.data_file.display(),
        "backend listening"
    );
    spawn_watchdog(config.socket_path.clone(), identity);

    let state = Arc::new(DaemonState {
        config,
        started: OffsetDateTime::now_utc(),
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &state) {
                        tracing::debug!(error = %err, "backend connection ended with error");
                    }
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
            }
        }
    }

    Ok(())
}

/// Inode of the bound socket file. A different inode (or none) means the address was unlinked
/// or taken over, and this backend no longer serves anyone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SocketIdentity {
    dev: u64,
    ino: u64,
}

impl SocketIdentity {
    fn for_path(path: &Path) -> Option<Self> {
        let meta = std::fs::symlink_metadata(path).ok()?;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Binds under a private name, records that file's identity, then renames it over the public
/// address. The recorded identity is always this listener's own, whatever happened to the
/// address meanwhile. `None` when a live backend already answers there.
fn bind_published(socket_path: &Path) -> std::io::Result<Option<(UnixListener, SocketIdentity)>> {
    let staging = staging_path(socket_path);
    let _ = std::fs::remove_file(&staging);
    let listener = UnixListener::bind(&staging)?;
    let Some(identity) = SocketIdentity::for_path(&staging) else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "bound socket file vanished before publishing",
        ));
    };

    if UnixStream::connect(socket_path).is_ok() {
        let _ = std::fs::remove_file(&staging);
        return Ok(None);
    }
    // rename(2) atomically replaces a stale file or socket left at the address.
    if let Err(err) = std::fs::rename(&staging, socket_path) {
        let _ = std::fs::remove_file(&staging);
        return Err(err);
    }
    Ok(Some((listener, identity)))
}

fn staging_path(socket_path: &Path) -> PathBuf {
    let name = format!(".gm.{}.bind", std::process::id());
    match socket_path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

fn spawn_watchdog(socket_path: PathBuf, baseline: SocketIdentity) {
    thread::spawn(move || {
        loop {
            thread::sleep(WATCHDOG_POLL);
            if SocketIdentity::for_path(&socket_path) != Some(baseline) {
                tracing::info!(socket = %socket_path.display(), "endpoint removed or replaced; backend exiting");
                std::process::exit(0);
            }
        }
    });
}

fn handle_connection(
    stream: UnixStream,
    state: &DaemonState,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    loop {
        let Some(body) = read_content_length_frame(&mut reader, None)? else {
            break;
        };

        let response = match parse_request(&body) {
            Ok(request) if request.method == SHUTDOWN_METHOD => {
                let resp = json_rpc_response(request.id, json!({ "ok": true }));
                write_content_length_json(&mut writer, &resp)?;
                tracing::info!("shutdown requested");
                let _ = Endpoint::new(&state.config.socket_path).remove_if_present();
                std::process::exit(0);
            }
            Ok(request) => dispatch(request, state),
            // Matches the proxy side: an id-less body never gets a reply, even when invalid.
            Err(err) => request_expects_response(&body).then_some(err),
        };

        if let Some(resp) = response {
            write_content_length_json(&mut writer, &resp)?;
        }
    }

    Ok(())
}

fn dispatch(request: JsonRpcRequest, state: &DaemonState) -> Option<Value> {
    if request.is_notification() {
        return None;
    }
    let id = request.id;
    let resp = match request.method.as_str() {
        HEALTH_METHOD => json_rpc_response(id, json!({ "status": HEALTH_OK })),
        "ping" => json_rpc_response(id, json!({})),
        INFO_METHOD => json_rpc_response(
            id,
            json!({
                "pid": std::process::id(),
                "socket": state.config.socket_path.to_string_lossy(),
                "data_file": state.config.data_file.to_string_lossy(),
                "started_at": crate::format_rfc3339(state.started),
                "uptime_ms": crate::elapsed_ms(state.started),
                "version": crate::SERVER_VERSION,
            }),
        ),
        other => json_rpc_error(id, METHOD_NOT_FOUND, &format!("Method not found: {other}")),
    };
    Some(resp)
}
