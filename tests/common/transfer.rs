//! Scripted remote store
//!
//! Serves each catalog movie's body from memory. Tests queue `Step`s per
//! movie to make individual transfer attempts fail, stall or wait on a gate;
//! once a movie's script is exhausted every further attempt is served in full.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use movie_vault::catalog_store::RemoteReference;
use movie_vault::remote_fetch::{RemoteTransfer, TransferClient, TransferError, TransferErrorKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::constants::{movie_body, remote_location, TEST_CHUNK_SIZE};

type Body = BoxStream<'static, Result<Bytes, TransferError>>;

/// What a single transfer attempt does.
pub enum Step {
    /// Serve the whole body.
    Serve,
    /// Refuse to open the transfer.
    Fail(TransferErrorKind),
    /// Send the first `after` bytes, then fail.
    FailAfter {
        after: usize,
        kind: TransferErrorKind,
    },
    /// Send the first `after` bytes, then never yield again.
    HangAfter(usize),
    /// Send the first `after` bytes, then wait for `gate` before sending the rest.
    GateAfter { after: usize, gate: Arc<Notify> },
}

pub struct ScriptedTransferClient {
    bodies: HashMap<String, Vec<u8>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransferClient {
    pub fn new<'a>(movie_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let bodies = movie_ids
            .into_iter()
            .map(|id| (remote_location(id), movie_body(id)))
            .collect();
        Self {
            bodies,
            scripts: Mutex::new(HashMap::new()),
            opens: Mutex::new(HashMap::new()),
        }
    }

    /// Queues steps for the next attempts on `movie_id`.
    pub fn script(&self, movie_id: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(remote_location(movie_id))
            .or_default()
            .extend(steps);
    }

    /// Number of transfers opened for `movie_id`, failed ones included.
    pub fn opens(&self, movie_id: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(&remote_location(movie_id))
            .copied()
            .unwrap_or(0)
    }
}

fn chunks(data: &[u8]) -> Body {
    let items: Vec<Result<Bytes, TransferError>> = data
        .chunks(TEST_CHUNK_SIZE)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(items).boxed()
}

#[async_trait]
impl TransferClient for ScriptedTransferClient {
    async fn open(&self, reference: &RemoteReference) -> Result<RemoteTransfer, TransferError> {
        *self
            .opens
            .lock()
            .unwrap()
            .entry(reference.location.clone())
            .or_default() += 1;

        let body = self.bodies.get(&reference.location).cloned().ok_or_else(|| {
            TransferError::new(
                TransferErrorKind::NotFound,
                format!("no such file: {}", reference.location),
            )
        })?;
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&reference.location)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Serve);

        let total_bytes = Some(body.len() as u64);
        let stream = match step {
            Step::Serve => chunks(&body),
            Step::Fail(kind) => {
                return Err(TransferError::new(kind, "scripted failure"));
            }
            Step::FailAfter { after, kind } => chunks(&body[..after])
                .chain(stream::once(async move {
                    Err(TransferError::new(kind, "scripted failure"))
                }))
                .boxed(),
            Step::HangAfter(after) => chunks(&body[..after]).chain(stream::pending()).boxed(),
            Step::GateAfter { after, gate } => {
                let tail = body[after..].to_vec();
                chunks(&body[..after])
                    .chain(
                        stream::once(async move { gate.notified().await })
                            .flat_map(move |_| chunks(&tail)),
                    )
                    .boxed()
            }
        };

        Ok(RemoteTransfer {
            total_bytes,
            stream,
        })
    }
}
