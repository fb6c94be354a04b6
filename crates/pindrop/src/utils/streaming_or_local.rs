use std::io;
use std::io::{Cursor, Read, Seek};
use tokio::io::AsyncReadExt;

/// Anything that can be both read and seeked.
pub trait ReadAndSeek: Read + Seek {}

impl<T: Read + Seek> ReadAndSeek for T {}

/// The body of an HTTP response: either still streaming from the network, or a complete
/// local (cached) file that supports seeking.
pub enum StreamingOrLocal {
    /// The data is streaming in from the network.
    Streaming(Box<dyn tokio::io::AsyncRead + Unpin + Send>),

    /// The data is available as a complete local file.
    Local(Box<dyn ReadAndSeek + Send>),
}

impl StreamingOrLocal {
    /// Reads the entire body into `bytes`.
    pub async fn read_to_end(self, bytes: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            StreamingOrLocal::Streaming(mut streaming) => streaming.read_to_end(bytes).await,
            StreamingOrLocal::Local(mut local) => local.read_to_end(bytes),
        }
    }

    /// Turns the body into something seekable, buffering a streaming body in memory.
    pub async fn force_local(self) -> io::Result<Box<dyn ReadAndSeek + Send>> {
        match self {
            StreamingOrLocal::Local(local) => Ok(local),
            StreamingOrLocal::Streaming(mut streaming) => {
                let mut bytes = Vec::new();
                streaming.read_to_end(&mut bytes).await?;
                Ok(Box::new(Cursor::new(bytes)))
            }
        }
    }
}
