//! Trait abstraction for byte stream I/O to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read side of a duplex byte channel
#[async_trait]
pub trait ByteSource: Send {
    /// Read whatever is available into `buf`
    ///
    /// `Ok(0)` means the stream has closed.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Write side of a duplex byte channel
#[async_trait]
pub trait ByteSink: Send {
    /// Write all data to the stream
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// One half of a tokio byte stream (serial port, pipe, test mock)
#[derive(Debug)]
pub struct StreamHalf<T> {
    inner: T,
}

impl<T> StreamHalf<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: AsyncRead + Unpin + Send> ByteSource for StreamHalf<T> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }
}

#[async_trait]
impl<T: AsyncWrite + Unpin + Send> ByteSink for StreamHalf<T> {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    #[tokio::test]
    async fn test_stream_half_reads_and_writes() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0xC8, 0x02])
            .write(&[0x01, 0x02, 0x03])
            .build();
        let mut half = StreamHalf::new(mock);

        let mut buf = [0u8; 8];
        let n = ByteSource::read(&mut half, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xC8, 0x02]);

        ByteSink::write_all(&mut half, &[0x01, 0x02, 0x03]).await.unwrap();
        ByteSink::flush(&mut half).await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_half_reports_eof() {
        let mock = tokio_test::io::Builder::new().read(&[0x01]).build();
        let mut half = StreamHalf::new(mock);

        let mut buf = [0u8; 8];
        assert_eq!(ByteSource::read(&mut half, &mut buf).await.unwrap(), 1);
        assert_eq!(ByteSource::read(&mut half, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mock_source_script() {
        let mut source = MockByteSource::closing(vec![vec![1, 2], vec![3]]);
        let mut buf = [0u8; 4];

        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(source.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 3);
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mock_sink_records_and_fails() {
        let mut sink = MockByteSink::new();
        sink.write_all(&[0xAA]).await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.get_written_data(), vec![vec![0xAA]]);
        assert_eq!(sink.flushes(), 1);

        sink.set_write_error(io::ErrorKind::BrokenPipe);
        let err = sink.write_all(&[0xBB]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
