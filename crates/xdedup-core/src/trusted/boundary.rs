use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use super::module::TrustedModule;
use crate::error::{Result, XdedupError};

/// The only way across the trust boundary: serialized request in,
/// serialized response out.
pub trait TrustedBoundary: Send + Sync {
    fn call(&self, request: Vec<u8>) -> Result<Vec<u8>>;
}

/// Dispatches on the caller's thread.
pub struct InProcessBoundary {
    module: Arc<TrustedModule>,
}

impl InProcessBoundary {
    pub fn new(module: TrustedModule) -> Self {
        Self {
            module: Arc::new(module),
        }
    }
}

impl TrustedBoundary for InProcessBoundary {
    fn call(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        Ok(self.module.handle_bytes(&request))
    }
}

type Call = (Vec<u8>, Sender<Vec<u8>>);

/// Runs the module on a dedicated thread that owns it outright. Callers
/// only ever exchange byte buffers with it over channels.
pub struct IsolatedBoundary {
    requests: Option<Sender<Call>>,
    worker: Option<JoinHandle<()>>,
}

impl IsolatedBoundary {
    pub fn spawn(module: TrustedModule) -> Result<Self> {
        let (tx, rx): (Sender<Call>, Receiver<Call>) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("xdedup-trusted".into())
            .spawn(move || {
                for (request, reply) in rx {
                    let response = module.handle_bytes(&request);
                    if reply.send(response).is_err() {
                        debug!("caller dropped before trusted reply");
                    }
                }
                debug!("trusted module thread exiting");
            })?;
        Ok(Self {
            requests: Some(tx),
            worker: Some(worker),
        })
    }
}

impl TrustedBoundary for IsolatedBoundary {
    fn call(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        let requests = self.requests.as_ref().ok_or(XdedupError::PeerClosed)?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        requests
            .send((request, reply_tx))
            .map_err(|_| XdedupError::PeerClosed)?;
        reply_rx.recv().map_err(|_| XdedupError::PeerClosed)
    }
}

impl Drop for IsolatedBoundary {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                debug!("trusted module thread panicked");
            }
        }
    }
}
