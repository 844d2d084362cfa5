use std::collections::HashMap;
use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use crate::codec::{BinCodec, Codec, Header};
use crate::errors::{Error, WireError};
use crate::service::Service;
use crate::stream_ext::StreamExt;

use co_managed::Manager;
use may::net::TcpListener;
use may::sync::RwLock;
use may::{coroutine, go};

macro_rules! t {
    ($e: expr) => {
        match $e {
            Ok(val) => val,
            Err(err) => {
                error!("call = {:?}\nerr = {:?}", stringify!($e), err);
                continue;
            }
        }
    };
}

/// running server instance
pub struct ServerInstance(Option<coroutine::JoinHandle<()>>);

impl ServerInstance {
    /// join the service, this would wait until the service is stopped
    pub fn join(mut self) -> std::thread::Result<()> {
        if let Some(handle) = self.0.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        if let Some(s) = self.0.take() {
            unsafe { s.coroutine().cancel() };
            s.join().ok();
        }
    }
}

/// an RPC server: a shared service registry plus the per-connection
/// dispatch machinery
///
/// `Server` is cheap to clone and clones share one registry, so services
/// can be registered while connections are being served. Each accepted
/// connection is served by its own coroutine; requests on one connection
/// are processed strictly one after another.
#[derive(Clone)]
pub struct Server {
    services: Arc<RwLock<HashMap<String, Arc<Service>>>>,
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

impl Server {
    /// create a server with an empty registry
    pub fn new() -> Self {
        Server {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// register a service, silently replacing any previous service of the
    /// same name
    pub fn register(&self, service: Service) {
        info!("register service: {}", service.name());
        let mut services = self.services.write().unwrap();
        services.insert(service.name().to_owned(), Arc::new(service));
    }

    /// spawn the service, binding to the given address
    ///
    /// Returns an instance handle that cancels the whole server, including
    /// the connections it is serving, when dropped.
    pub fn start<L: ToSocketAddrs>(&self, addr: L) -> io::Result<ServerInstance> {
        let listener = TcpListener::bind(addr)?;
        let server = self.clone();
        let instance = go!(
            coroutine::Builder::new().name("RpcServer".to_owned()),
            move || server.accept(listener)
        )?;
        Ok(ServerInstance(Some(instance)))
    }

    /// accept connections on the listener forever, serving each one in its
    /// own managed coroutine
    pub fn accept(&self, listener: TcpListener) {
        let manager = Manager::new();
        for stream in listener.incoming() {
            let stream = t!(stream);
            stream.set_nodelay(true).ok();
            let server = self.clone();
            manager.add(move || server.serve_stream(stream));
        }
    }

    /// serve a single duplex connection with the default codec
    pub fn serve_stream<S: StreamExt>(&self, stream: S) {
        match BinCodec::new(stream) {
            Ok(codec) => self.serve_codec(&codec),
            Err(e) => error!("server: failed to split stream, err = {}", e),
        }
    }

    /// run the request cycle on `codec` until the peer disconnects
    ///
    /// One request is fully read, invoked and answered before the next is
    /// read. Resolution and invocation failures are answered in-band and
    /// never end the cycle; only end of stream, an undecodable header or a
    /// write failure do.
    pub fn serve_codec<C: Codec>(&self, codec: &C) {
        let mut header = Header::default();
        loop {
            match codec.read_header(&mut header) {
                Ok(()) => {}
                Err(Error::ConnectionClosed) => {
                    info!("server: connection closed");
                    break;
                }
                Err(e) => {
                    error!("server: read request header err = {}", e);
                    break;
                }
            }

            // the body frame is consumed even when resolution fails below,
            // otherwise the next header read would land inside it
            let body = match codec.read_body() {
                Ok(body) => body,
                Err(e) => {
                    error!("server: read request body err = {}", e);
                    break;
                }
            };

            info!(
                "server: request seq={} method={}",
                header.sequence, header.service_method
            );
            let (error, reply) = self.dispatch(&header.service_method, &body);
            header.error = error;
            if let Err(e) = codec.write(&header, &reply) {
                error!("server: write response err = {}", e);
                break;
            }
        }
    }

    /// resolve `service_method` against the registry and invoke it on the
    /// raw argument payload
    fn dispatch(&self, service_method: &str, body: &[u8]) -> (Option<WireError>, Vec<u8>) {
        let (service, method_name) = match self.lookup(service_method) {
            Ok(found) => found,
            Err(e) => return (Some(e), Vec::new()),
        };
        match service.method(method_name) {
            Some(entry) => entry.invoke(body),
            None => (
                Some(WireError::UnknownMethod(service_method.to_owned())),
                Vec::new(),
            ),
        }
    }

    // "Service.Method" splits at the last dot, method names cannot contain
    // one but service names may
    fn lookup<'a>(
        &self,
        service_method: &'a str,
    ) -> Result<(Arc<Service>, &'a str), WireError> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| WireError::InvalidServiceMethod(service_method.to_owned()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);
        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| WireError::UnknownService(service_method.to_owned()))?;
        Ok((service, method_name))
    }
}
