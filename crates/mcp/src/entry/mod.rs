#![forbid(unsafe_code)]

pub(crate) mod framing;
pub(crate) mod socket;
mod worker;

pub(crate) use socket::{DaemonConfig, run_socket_daemon};
pub(crate) use worker::{WorkerConfig, run_worker};
