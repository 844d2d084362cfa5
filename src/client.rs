use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::{BinCodec, Codec, Header};
use crate::errors::Error;
use crate::stream_ext::StreamExt;

use bytes::Bytes;
use may::net::TcpStream;
use may::sync::{mpsc, Mutex};
use may::{coroutine, go};
use serde::de::DeserializeOwned;
use serde::Serialize;

// completes one call: decodes the reply into the caller's type and signals
// the waiting future; runs at most once
type CompleteFn = Box<dyn FnOnce(Result<Bytes, Error>) + Send>;

/// per-connection index from sequence number to outstanding completion,
/// shared between the call-issuing path and the response reader
struct PendingCalls {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    closed: bool,
    calls: HashMap<String, CompleteFn>,
}

impl PendingCalls {
    fn new() -> Self {
        PendingCalls {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// park a completion under `sequence`; fails once the connection is down
    fn insert(&self, sequence: String, complete: CompleteFn) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::ConnectionClosed);
        }
        inner.calls.insert(sequence, complete);
        Ok(())
    }

    /// atomically look up and remove the completion for `sequence`
    fn remove(&self, sequence: &str) -> Option<CompleteFn> {
        self.inner.lock().unwrap().calls.remove(sequence)
    }

    /// fail every outstanding call and refuse new ones
    fn close(&self) {
        let calls = {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            std::mem::take(&mut inner.calls)
        };
        // completions signal waiting callers, run them outside the lock
        for (_, complete) in calls {
            complete(Err(Error::ConnectionClosed));
        }
    }
}

/// a client-side handle representing one in-flight remote invocation
///
/// Produced by [`Client::go`]. The call completes through [`Call::wait`];
/// dropping it instead simply discards the result when it arrives.
pub struct Call<P> {
    service_method: String,
    done: mpsc::Receiver<Result<P, Error>>,
}

impl<P> Call<P> {
    /// the `"Service.Method"` this call targets
    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// block until the response arrives and yield it
    pub fn wait(self) -> Result<P, Error> {
        self.done.recv().unwrap_or(Err(Error::ConnectionClosed))
    }
}

impl<P> fmt::Debug for Call<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("service_method", &self.service_method)
            .finish()
    }
}

/// an RPC client over one connection
///
/// Calls may be issued from any number of coroutines. A dedicated reader
/// coroutine correlates responses back to their callers by sequence number;
/// when the connection is lost, every call still in flight fails with
/// [`Error::ConnectionClosed`] rather than blocking forever.
pub struct Client<C: Codec> {
    seq: AtomicU64,
    codec: Arc<C>,
    pending: Arc<PendingCalls>,
    reader: Option<coroutine::JoinHandle<()>>,
}

impl Client<BinCodec<TcpStream>> {
    /// connect to a TCP server address
    pub fn connect<L: ToSocketAddrs>(addr: L) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Self::new(stream)
    }
}

impl<S: StreamExt> Client<BinCodec<S>> {
    /// wrap an established duplex stream with the default codec
    pub fn new(stream: S) -> io::Result<Self> {
        Self::with_codec(BinCodec::new(stream)?)
    }
}

impl<C: Codec> Client<C> {
    /// build a client over a custom codec and spawn its response reader
    pub fn with_codec(codec: C) -> io::Result<Self> {
        let codec = Arc::new(codec);
        let pending = Arc::new(PendingCalls::new());
        let reader_codec = codec.clone();
        let reader_pending = pending.clone();
        let reader = go!(
            coroutine::Builder::new().name("RpcClientReader".to_owned()),
            move || read_responses(&*reader_codec, &reader_pending)
        )?;

        Ok(Client {
            seq: AtomicU64::new(0),
            codec,
            pending,
            reader: Some(reader),
        })
    }

    /// issue a call without waiting for its response
    ///
    /// The returned future is registered for completion before the request
    /// bytes hit the wire, so a response can never arrive unclaimed. The
    /// sequence numbers backing correlation are strictly increasing and
    /// never reused within this client.
    pub fn go<A, P>(&self, service_method: &str, args: &A) -> Result<Call<P>, Error>
    where
        A: Serialize,
        P: DeserializeOwned + Send + 'static,
    {
        let body = bincode::serialize(args).map_err(|e| Error::ClientSerialize(e.to_string()))?;
        let sequence = self.seq.fetch_add(1, Ordering::Relaxed).to_string();
        let header = Header {
            sequence: sequence.clone(),
            service_method: service_method.to_owned(),
            error: None,
        };

        let (tx, rx) = mpsc::channel();
        let complete: CompleteFn = Box::new(move |rsp| {
            let rsp = rsp.and_then(|body| {
                bincode::deserialize(&body).map_err(|e| Error::ClientDeserialize(e.to_string()))
            });
            // a send with nobody listening means the caller dropped the
            // future, the result is simply discarded
            tx.send(rsp).ok();
        });
        self.pending.insert(sequence.clone(), complete)?;

        info!("client: request seq={} method={}", sequence, service_method);
        if let Err(e) = self.codec.write(&header, &body) {
            // never made it onto the wire; drop the completion unless the
            // reader's teardown already failed it
            self.pending.remove(&sequence);
            return Err(e);
        }

        Ok(Call {
            service_method: header.service_method,
            done: rx,
        })
    }

    /// issue a call and block until its result arrives
    ///
    /// Only the calling coroutine blocks; other calls on this client keep
    /// completing in the meantime.
    pub fn call<A, P>(&self, service_method: &str, args: &A) -> Result<P, Error>
    where
        A: Serialize,
        P: DeserializeOwned + Send + 'static,
    {
        self.go(service_method, args)?.wait()
    }
}

impl<C: Codec> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("reader", &self.reader).finish()
    }
}

impl<C: Codec> Drop for Client<C> {
    fn drop(&mut self) {
        if let Some(h) = self.reader.take() {
            unsafe { h.coroutine().cancel() };
            h.join().ok();
        }
    }
}

/// correlate incoming responses to pending calls until the stream ends,
/// then fail whatever is left
fn read_responses<C: Codec>(codec: &C, pending: &PendingCalls) {
    let mut header = Header::default();
    loop {
        match codec.read_header(&mut header) {
            Ok(()) => {}
            Err(Error::ConnectionClosed) => {
                info!("client: connection closed");
                break;
            }
            Err(e) => {
                error!("client: read response header err = {}", e);
                break;
            }
        }
        let body = match codec.read_body() {
            Ok(body) => body,
            Err(e) => {
                error!("client: read response body err = {}", e);
                break;
            }
        };

        match pending.remove(&header.sequence) {
            Some(complete) => {
                let rsp = match header.error.take() {
                    Some(wire) => Err(Error::Server(wire)),
                    None => Ok(body),
                };
                complete(rsp);
            }
            // late, duplicate or already cleaned up; nothing waits on it
            None => info!("client: orphan response seq={}", header.sequence),
        }
    }
    pending.close();
}
