//! parley is an RPC engine for rust based on coroutines. A process registers
//! plain methods on a named service at runtime and a remote peer invokes them
//! over a byte-stream connection, with request/response correlation, a
//! pluggable wire codec and an asynchronous client-side call abstraction.
//!
//! Services are registered through a builder rather than generated from a
//! schema: any method of the shape `Fn(&Receiver, &Args, &mut Reply) ->
//! Result<(), _>` can be registered under a name, and any serde-serializable
//! type can be used for the arguments and the reply. The server runs one
//! coroutine per accepted connection and processes that connection's requests
//! sequentially; the client issues calls from any number of coroutines and a
//! dedicated reader correlates responses back to their callers by sequence
//! number.
//!
//! Example usage:
//!
//! ```no_run
//! use parley::{Client, Server, Service};
//!
//! struct Greeter;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new();
//!     server.register(
//!         Service::build(Greeter)
//!             .method("hello", |_: &Greeter, name: &String, reply: &mut String| {
//!                 *reply = format!("Hello, {name}!");
//!                 Ok(())
//!             })
//!             .finish(),
//!     );
//!     let _instance = server.start(("127.0.0.1", 10000))?;
//!
//!     let client = Client::connect(("127.0.0.1", 10000))?;
//!     let reply: String = client.call("Greeter.hello", &"Mom".to_string())?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```
//!

#![deny(missing_docs)]

#[macro_use]
extern crate log;

pub use client::{Call, Client};
pub use codec::{BinCodec, Codec, Header};
pub use errors::{Error, WireError};
pub use server::{Server, ServerInstance};
pub use service::{MethodResult, Service, ServiceBuilder};
pub use stream_ext::StreamExt;

/// Provides the client call machinery
mod client;
/// header/body framing over a byte stream
mod codec;
/// Provides a few different error types
mod errors;
/// Provides the server framework
mod server;
/// Provides runtime service registration
mod service;

mod stream_ext;
