use std::io::{Read, Write};

use may::io::SplitIo;

/// byte stream a codec can sit on
///
/// Anything that can be split into independently owned read and write halves
/// qualifies, notably `may::net::TcpStream` and, on unix,
/// `may::os::unix::net::UnixStream`.
pub trait StreamExt: SplitIo + Read + Write + Send + Sized + 'static {}

impl<S: SplitIo + Read + Write + Send + Sized + 'static> StreamExt for S {}
