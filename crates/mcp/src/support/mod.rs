#![forbid(unsafe_code)]

mod crash;
mod jsonrpc;
mod runtime;
mod time;

pub(crate) use crash::*;
pub(crate) use jsonrpc::*;
pub(crate) use runtime::*;
pub(crate) use self::time::*;
