//! Keyed single-value exchange between a producing kernel and a consumer.
//!
//! Keys follow `src_device;src_incarnation;dst_device;edge_name;frame:iter`.
//! [`SimpleRendezvous`] indexes values by the edge name and assumes a single
//! sender and a single receiver per key.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::tensor::Tensor;

use super::lock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendezvousError {
    #[error("send of a dead tensor for `{key}`")]
    DeadTensor { key: String },
    #[error("send of an already sent tensor for `{key}`")]
    DuplicateSend { key: String },
    #[error("did not find key `{key}`")]
    NotFound { key: String },
    #[error("malformed rendezvous key `{key}`")]
    MalformedKey { key: String },
    #[error("rendezvous aborted: {reason}")]
    Aborted { reason: String },
}

/// A received value. `is_dead` marks a value that was never produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub tensor: Tensor,
    pub is_dead: bool,
}

pub type RecvCallback = Box<dyn FnOnce(Result<FetchResult, RendezvousError>) + Send>;

pub trait Rendezvous: Send + Sync {
    fn send(&self, key: &str, value: Tensor, is_dead: bool) -> Result<(), RendezvousError>;

    /// Delivers the value for `key` to `done`, possibly on another thread.
    fn recv_async(&self, key: &str, done: RecvCallback);

    /// Aborts the rendezvous; pending and later operations fail with `reason`.
    fn start_abort(&self, reason: &str);

    /// Blocks until [`Rendezvous::recv_async`] delivers.
    fn recv(&self, key: &str) -> Result<FetchResult, RendezvousError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.recv_async(
            key,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.recv().unwrap_or_else(|_| {
            Err(RendezvousError::Aborted {
                reason: format!("receive for `{key}` was dropped"),
            })
        })
    }
}

/// Builds a rendezvous key for `edge_name` travelling from `src_device` to `dst_device`.
pub fn create_key(
    src_device: &str,
    src_incarnation: u64,
    dst_device: &str,
    edge_name: &str,
) -> String {
    format!("{src_device};{src_incarnation:016x};{dst_device};{edge_name};0:0")
}

/// Components of a rendezvous key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub src_device: &'a str,
    pub src_incarnation: u64,
    pub dst_device: &'a str,
    pub edge_name: &'a str,
}

impl<'a> ParsedKey<'a> {
    pub fn parse(key: &'a str) -> Result<Self, RendezvousError> {
        let malformed = || RendezvousError::MalformedKey {
            key: key.to_string(),
        };
        let parts: Vec<&str> = key.split(';').collect();
        if parts.len() != 5 || parts[3].is_empty() {
            return Err(malformed());
        }
        let src_incarnation = u64::from_str_radix(parts[1], 16).map_err(|_| malformed())?;
        Ok(ParsedKey {
            src_device: parts[0],
            src_incarnation,
            dst_device: parts[2],
            edge_name: parts[3],
        })
    }
}

#[derive(Default)]
struct Table {
    values: HashMap<String, Tensor>,
    aborted: Option<String>,
}

/// Rendezvous scoped to one execution: one value per edge name, no dead values,
/// receives that find nothing fail immediately.
#[derive(Default)]
pub struct SimpleRendezvous {
    table: Mutex<Table>,
}

impl SimpleRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.table).values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Rendezvous for SimpleRendezvous {
    fn send(&self, key: &str, value: Tensor, is_dead: bool) -> Result<(), RendezvousError> {
        if is_dead {
            return Err(RendezvousError::DeadTensor {
                key: key.to_string(),
            });
        }
        let parsed = ParsedKey::parse(key)?;

        let mut table = lock(&self.table);
        if let Some(reason) = &table.aborted {
            return Err(RendezvousError::Aborted {
                reason: reason.clone(),
            });
        }
        if table.values.contains_key(parsed.edge_name) {
            return Err(RendezvousError::DuplicateSend {
                key: key.to_string(),
            });
        }
        table.values.insert(parsed.edge_name.to_string(), value);
        Ok(())
    }

    fn recv_async(&self, key: &str, done: RecvCallback) {
        let result = ParsedKey::parse(key).and_then(|parsed| {
            let table = lock(&self.table);
            if let Some(reason) = &table.aborted {
                return Err(RendezvousError::Aborted {
                    reason: reason.clone(),
                });
            }
            table
                .values
                .get(parsed.edge_name)
                .cloned()
                .map(|tensor| FetchResult {
                    tensor,
                    is_dead: false,
                })
                .ok_or_else(|| RendezvousError::NotFound {
                    key: key.to_string(),
                })
        });
        done(result);
    }

    fn start_abort(&self, reason: &str) {
        let mut table = lock(&self.table);
        if table.aborted.is_none() {
            table.aborted = Some(reason.to_string());
        }
    }
}
