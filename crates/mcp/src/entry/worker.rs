#![forbid(unsafe_code)]

use crate::entry::framing::{
    TransportMode, detect_mode_from_first_line, read_content_length_frame, request_expects_response,
    request_id, write_content_length_raw, write_framed,
};
use crate::{TRANSPORT_ERROR, json_rpc_error};
use std::io::{BufRead, BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub(crate) struct WorkerConfig {
    pub(crate) socket_path: PathBuf,
}

/// Per-client stdio proxy in front of the shared backend.
///
/// The backend is never spawned from here: once it is gone, requests are answered with a
/// transport error and the next request retries the connection.
pub(crate) fn run_worker(config: WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let mut stdout = std::io::stdout().lock();
    let mut backend: Option<BackendPipe> = None;
    let mut mode: Option<TransportMode> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            tracing::debug!("stdin closed; worker exiting");
            break;
        }

        let current = match mode {
            Some(current) => current,
            None => match detect_mode_from_first_line(&line) {
                Some(detected) => {
                    tracing::debug!(?detected, "client transport detected");
                    mode = Some(detected);
                    detected
                }
                None => continue,
            },
        };

        let body = match current {
            TransportMode::NewlineJson => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                raw.as_bytes().to_vec()
            }
            TransportMode::ContentLength => {
                if line.trim().is_empty() {
                    continue;
                }
                match read_content_length_frame(&mut reader, Some(line)) {
                    Ok(Some(body)) => body,
                    Ok(None) => break,
                    Err(err) => {
                        // Bad framing must not kill the transport; re-sniff on the next line.
                        tracing::warn!(error = %err, "invalid client frame");
                        mode = None;
                        continue;
                    }
                }
            }
        };

        if let Some(resp) = forward(&mut backend, &config, &body) {
            write_framed(&mut stdout, current, &resp)?;
        }
    }

    Ok(())
}

fn forward(
    backend: &mut Option<BackendPipe>,
    config: &WorkerConfig,
    body: &[u8],
) -> Option<Vec<u8>> {
    let expects_response = request_expects_response(body);
    if backend.is_none() {
        match BackendPipe::connect(config) {
            Ok(pipe) => *backend = Some(pipe),
            Err(err) => {
                tracing::warn!(error = %err, "backend unreachable");
                return expects_response.then(|| transport_error(body, &err.to_string()));
            }
        }
    }

    let pipe = backend.as_mut()?;
    match pipe.send(body, expects_response) {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(error = %err, "backend connection lost");
            *backend = None;
            expects_response.then(|| transport_error(body, &err.to_string()))
        }
    }
}

fn transport_error(body: &[u8], message: &str) -> Vec<u8> {
    let payload = json_rpc_error(request_id(body), TRANSPORT_ERROR, message);
    serde_json::to_vec(&payload).unwrap_or_else(|_| {
        br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32000,"message":"backend unavailable"}}"#
            .to_vec()
    })
}

struct BackendPipe {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
}

impl BackendPipe {
    fn connect(config: &WorkerConfig) -> std::io::Result<Self> {
        let stream = UnixStream::connect(&config.socket_path)?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    fn send(&mut self, body: &[u8], expects_response: bool) -> std::io::Result<Option<Vec<u8>>> {
        write_content_length_raw(&mut self.writer, body)?;
        if !expects_response {
            return Ok(None);
        }
        match read_content_length_frame(&mut self.reader, None)? {
            Some(resp) => Ok(Some(resp)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "backend connection closed",
            )),
        }
    }
}
