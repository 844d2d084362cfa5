use std::io::{self, BufReader, ErrorKind, Read, Write};

use crate::errors::{Error, WireError};
use crate::stream_ext::StreamExt;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Bytes, BytesMut};
use may::io::{SplitIo, SplitReader, SplitWriter};
use may::sync::Mutex;
use serde::{Deserialize, Serialize};

// Message layout
// every message is two consecutive frames, header then body
// each frame is len(u64) + payload([u8; len])

// max frame len
const FRAME_MAX_LEN: u64 = 1024 * 1024;

/// correlation and routing metadata accompanying every request and response
/// body
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// sequence value chosen by the client and echoed back unchanged by the
    /// server, unique among the calls in flight on one client connection
    pub sequence: String,
    /// target of the call, format "Service.Method"
    pub service_method: String,
    /// in-band failure report, set only on responses
    pub error: Option<WireError>,
}

/// the component that frames and (de)serializes header/body pairs over a
/// byte stream
///
/// A header must never hit the wire without its body, so `write` transmits
/// both as one indivisible unit. Implementations serialize concurrent
/// readers and concurrent writers internally; the engine only ever reads
/// from one place per connection, but the write path makes no such
/// assumption.
pub trait Codec: Send + Sync + 'static {
    /// read the next message header into `header`
    ///
    /// A clean end of stream maps to [`Error::ConnectionClosed`].
    fn read_header(&self, header: &mut Header) -> Result<(), Error>;

    /// read the body payload that follows a header
    ///
    /// The raw payload is returned; decoding it into the registered argument
    /// or reply type happens at the call site, which knows the type.
    fn read_body(&self) -> Result<Bytes, Error>;

    /// write one message, header and body, as an indivisible unit
    fn write(&self, header: &Header, body: &[u8]) -> Result<(), Error>;
}

/// the default codec: bincode values over explicit length framing
///
/// bincode is not self-describing, so each value carries a length prefix to
/// preserve message boundaries on the stream.
pub struct BinCodec<S: StreamExt> {
    reader: Mutex<FrameReader<SplitReader<S>>>,
    writer: Mutex<FrameWriter<SplitWriter<S>>>,
}

impl<S: StreamExt> BinCodec<S> {
    /// split the stream and wrap both halves
    pub fn new(stream: S) -> io::Result<Self> {
        let (reader, writer) = stream.split()?;
        Ok(BinCodec {
            reader: Mutex::new(FrameReader::new(reader)),
            writer: Mutex::new(FrameWriter::new(writer)),
        })
    }
}

impl<S: StreamExt> Codec for BinCodec<S> {
    fn read_header(&self, header: &mut Header) -> Result<(), Error> {
        self.reader.lock().unwrap().read_header(header)
    }

    fn read_body(&self) -> Result<Bytes, Error> {
        self.reader.lock().unwrap().read_frame()
    }

    fn write(&self, header: &Header, body: &[u8]) -> Result<(), Error> {
        self.writer.lock().unwrap().write(header, body)
    }
}

struct FrameReader<R: Read> {
    reader: BufReader<R>,
    buf: BytesMut,
}

impl<R: Read> FrameReader<R> {
    fn new(reader: R) -> Self {
        FrameReader {
            reader: BufReader::new(reader),
            buf: BytesMut::with_capacity(1024 * 32),
        }
    }

    /// decode one length-prefixed frame from the stream
    fn read_frame(&mut self) -> Result<Bytes, Error> {
        let len = self.reader.read_u64::<BigEndian>().map_err(map_read_err)?;
        if len > FRAME_MAX_LEN {
            let s = format!("decode too big frame length. len={len}");
            error!("{s}");
            return Err(Error::Io(io::Error::new(ErrorKind::InvalidInput, s)));
        }

        let len = len as usize;
        self.buf.resize(len, 0);
        self.reader
            .read_exact(&mut self.buf[..])
            .map_err(map_read_err)?;
        Ok(self.buf.split_to(len).freeze())
    }

    fn read_header(&mut self, header: &mut Header) -> Result<(), Error> {
        let frame = self.read_frame()?;
        *header =
            bincode::deserialize(&frame).map_err(|e| Error::MalformedHeader(e.to_string()))?;
        Ok(())
    }
}

// end of stream at a frame boundary is a close, not a failure
fn map_read_err(e: io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

struct FrameWriter<W: Write> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: Write> FrameWriter<W> {
    fn new(writer: W) -> Self {
        FrameWriter {
            writer,
            buf: Vec::with_capacity(1024),
        }
    }

    /// stage the header and body frames, then push both with a single write
    fn write(&mut self, header: &Header, body: &[u8]) -> Result<(), Error> {
        let head = bincode::serialize(header)
            .map_err(|e| Error::Io(io::Error::new(ErrorKind::InvalidData, e.to_string())))?;
        let len = head.len().max(body.len()) as u64;
        if len > FRAME_MAX_LEN {
            let s = format!("encode too big frame length. len={len}");
            error!("{s}");
            return Err(Error::Io(io::Error::new(ErrorKind::InvalidInput, s)));
        }

        self.buf.clear();
        self.buf.write_u64::<BigEndian>(head.len() as u64)?;
        self.buf.extend_from_slice(&head);
        self.buf.write_u64::<BigEndian>(body.len() as u64)?;
        self.buf.extend_from_slice(body);

        self.writer.write_all(&self.buf)?;
        self.writer.flush()?;
        Ok(())
    }
}
