use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::WireError;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// result a service method returns; the error's display text is carried
/// back to the remote caller verbatim
pub type MethodResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

// the erased seam between wire payloads and typed methods: raw argument
// bytes in, (in-band error, serialized reply) out
type InvokeFn = Box<dyn Fn(&[u8]) -> (Option<WireError>, Vec<u8>) + Send + Sync>;

/// invocation logic for one registered method, built once at registration
/// time
pub(crate) struct MethodEntry {
    invoke: InvokeFn,
}

impl MethodEntry {
    pub(crate) fn invoke(&self, args: &[u8]) -> (Option<WireError>, Vec<u8>) {
        (self.invoke)(args)
    }
}

/// a named group of invocable methods, backed by one registered receiver
///
/// Built with [`Service::build`]; immutable once finished.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl Service {
    /// open a builder for a service backed by `receiver`
    ///
    /// The service name is derived from the receiver's bare type name
    /// (module path and generic parameters stripped); use
    /// [`ServiceBuilder::named`] to pick another one.
    pub fn build<R: Send + Sync + 'static>(receiver: R) -> ServiceBuilder<R> {
        ServiceBuilder {
            name: type_basename::<R>().to_owned(),
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    /// the name this service registers under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn method(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.get(name)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn type_basename<R>() -> &'static str {
    let name = std::any::type_name::<R>();
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or(name)
}

/// builder that assembles a service's method table from typed closures
pub struct ServiceBuilder<R> {
    name: String,
    receiver: Arc<R>,
    methods: HashMap<String, MethodEntry>,
}

impl<R: Send + Sync + 'static> ServiceBuilder<R> {
    /// register the service under `name` instead of the derived type name
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// register one method under `name`, replacing any previous one
    ///
    /// The method receives the shared receiver, the decoded arguments and a
    /// default-constructed reply value to fill in. Its error, if any,
    /// travels back to the caller as [`WireError::Method`]; the reply is
    /// transmitted either way, so a failed call still carries a
    /// well-formed (possibly default) reply body.
    pub fn method<A, P, F>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + 'static,
        P: Serialize + Default + 'static,
        F: Fn(&R, &A, &mut P) -> MethodResult + Send + Sync + 'static,
    {
        let receiver = self.receiver.clone();
        let invoke: InvokeFn = Box::new(move |raw| {
            let args: A = match bincode::deserialize(raw) {
                Ok(args) => args,
                Err(e) => return (Some(WireError::ServerDeserialize(e.to_string())), Vec::new()),
            };
            let mut reply = P::default();
            let status = f(&receiver, &args, &mut reply);
            match bincode::serialize(&reply) {
                Ok(body) => (
                    status.err().map(|e| WireError::Method(e.to_string())),
                    body,
                ),
                Err(e) => (Some(WireError::ServerSerialize(e.to_string())), Vec::new()),
            }
        });
        self.methods.insert(name.to_owned(), MethodEntry { invoke });
        self
    }

    /// finish the builder into an immutable service
    pub fn finish(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}
