//! # Serial Communication Module
//!
//! Opens the CRSF serial link (8N1, no flow control) and splits it into
//! independent read and write halves for the two bridge directions.

pub mod port_trait;

pub use port_trait::{ByteSink, ByteSource, StreamHalf};

use crate::config::SerialConfig;
use crate::error::{CrsfBridgeError, Result};
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Read half of an opened serial port
pub type SerialReader = StreamHalf<ReadHalf<SerialStream>>;

/// Write half of an opened serial port
pub type SerialWriter = StreamHalf<WriteHalf<SerialStream>>;

/// CRSF serial port
pub struct CrsfSerial {
    port: SerialStream,
    device_path: String,
}

impl std::fmt::Debug for CrsfSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrsfSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl CrsfSerial {
    /// Open the configured serial port
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use crsf_bridge::config::SerialConfig;
    /// use crsf_bridge::serial::CrsfSerial;
    ///
    /// # async fn run() -> crsf_bridge::error::Result<()> {
    /// let serial = CrsfSerial::open(&SerialConfig::default())?;
    /// println!("Connected to: {}", serial.device_path());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        Self::open_with_paths(&[config.port.as_str()], config)
    }

    /// Open the first device in `paths` that accepts the CRSF settings
    pub fn open_with_paths(paths: &[&str], config: &SerialConfig) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, config) {
                Ok(port) => {
                    info!("Opened CRSF serial port {} at {} baud", path, config.baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                }
            }
        }

        Err(CrsfBridgeError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, config: &SerialConfig) -> Result<SerialStream> {
        tokio_serial::new(path, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open_native_async()
            .map_err(|e| CrsfBridgeError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Split into independently owned read and write halves
    pub fn into_split(self) -> (SerialReader, SerialWriter) {
        let (reader, writer) = tokio::io::split(self.port);
        (StreamHalf::new(reader), StreamHalf::new(writer))
    }
}
