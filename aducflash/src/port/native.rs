//! Native serial port implementation using the `serialport` crate.
//!
//! On Unix the terminal attributes of the device are read before
//! `serialport` reconfigures it, and that full `termios` state is what a
//! session restores.

use {
    crate::{
        error::{Error, Result},
        port::{
            DataBits, FlowControl, LineSettings, LineSnapshot, Parity, Port, PortEnumerator,
            PortInfo, SerialConfig, StopBits,
        },
    },
    log::trace,
    serialport::ClearBuffer,
    std::{
        io::{self, Read, Write},
        thread,
        time::{Duration, Instant},
    },
};

/// Driver timeout for a single read or write attempt.
///
/// Blocking reads are built by retrying, so this only bounds how often the
/// interrupt checker and the response timeout are looked at.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delay between readiness checks while waiting for the handshake reply.
const READY_POLL_DELAY: Duration = Duration::from_millis(10);

#[cfg(unix)]
mod termios {
    use {
        nix::{
            fcntl::OFlag,
            sys::termios::{self, SetArg, Termios},
        },
        std::{
            fs::{File, OpenOptions},
            io,
            os::unix::fs::OpenOptionsExt,
        },
    };

    /// Terminal attributes of a device as they were before it was opened
    /// for the session, with a descriptor to write them back through.
    pub(super) struct SavedAttributes {
        file: File,
        saved: Termios,
    }

    impl SavedAttributes {
        pub(super) fn read(path: &str) -> io::Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
                .open(path)?;
            let saved = termios::tcgetattr(&file)?;
            Ok(Self { file, saved })
        }

        pub(super) fn saved(&self) -> &Termios {
            &self.saved
        }

        pub(super) fn write(&self, attributes: &Termios) -> io::Result<()> {
            termios::tcsetattr(&self.file, SetArg::TCSANOW, attributes)?;
            Ok(())
        }
    }
}

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    response_timeout: Option<Duration>,
    #[cfg(unix)]
    attributes: termios::SavedAttributes,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        // Must happen before serialport touches the line
        #[cfg(unix)]
        let attributes = termios::SavedAttributes::read(&config.port_name)
            .map_err(serialport::Error::from)?;

        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(POLL_INTERVAL)
            .data_bits(
                config
                    .data_bits
                    .into(),
            )
            .parity(
                config
                    .parity
                    .into(),
            )
            .stop_bits(
                config
                    .stop_bits
                    .into(),
            )
            .flow_control(
                config
                    .flow_control
                    .into(),
            )
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            response_timeout: config.response_timeout,
            #[cfg(unix)]
            attributes,
        })
    }

    fn inner(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| {
                Error::Serial(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "Port is closed",
                ))
            })
    }

    /// Retry `op` on driver timeouts until it completes, the response
    /// timeout expires or an interrupt is requested.
    fn blocking<T>(
        &mut self,
        mut op: impl FnMut(&mut dyn serialport::SerialPort) -> io::Result<T>,
    ) -> io::Result<T> {
        let response_timeout = self.response_timeout;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;
        let start = Instant::now();

        loop {
            match op(port.as_mut()) {
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if crate::is_interrupted_requested() {
                        return Err(io::Error::other("interrupted"));
                    }
                    if response_timeout.is_some_and(|t| start.elapsed() >= t) {
                        return Err(e);
                    }
                },
                other => return other,
            }
        }
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn line_settings(&mut self) -> Result<LineSettings> {
        let port = self.inner()?;
        Ok(LineSettings {
            baud_rate: port.baud_rate()?,
            data_bits: port
                .data_bits()?
                .into(),
            parity: port
                .parity()?
                .into(),
            stop_bits: port
                .stop_bits()?
                .into(),
            flow_control: port
                .flow_control()?
                .into(),
        })
    }

    fn apply_line_settings(&mut self, settings: &LineSettings) -> Result<()> {
        trace!("Applying line settings to {}: {settings:?}", self.name);
        let port = self.inner()?;
        port.set_baud_rate(settings.baud_rate)?;
        port.set_data_bits(
            settings
                .data_bits
                .into(),
        )?;
        port.set_parity(
            settings
                .parity
                .into(),
        )?;
        port.set_stop_bits(
            settings
                .stop_bits
                .into(),
        )?;
        port.set_flow_control(
            settings
                .flow_control
                .into(),
        )?;
        Ok(())
    }

    #[cfg(unix)]
    fn save_line(&mut self) -> Result<LineSnapshot> {
        Ok(LineSnapshot::Termios(
            self.attributes
                .saved()
                .clone(),
        ))
    }

    fn restore_line(&mut self, snapshot: &LineSnapshot) -> Result<()> {
        match snapshot {
            LineSnapshot::Settings(settings) => self.apply_line_settings(settings),
            #[cfg(unix)]
            LineSnapshot::Termios(attributes) => {
                trace!("Restoring terminal attributes of {}", self.name);
                self.attributes
                    .write(attributes)?;
                Ok(())
            },
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inner()?
            .clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            if self
                .inner()?
                .bytes_to_read()?
                > 0
            {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            thread::sleep(READY_POLL_DELAY);
        }
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port
            .take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.blocking(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.blocking(|p| p.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.flush())
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product, serial_number) = match p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer,
                        info.product,
                        info.serial_number,
                    ),
                    _ => (None, None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                    serial_number,
                }
            })
            .collect())
    }
}

// Conversions between our types and serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<serialport::DataBits> for DataBits {
    fn from(bits: serialport::DataBits) -> Self {
        match bits {
            serialport::DataBits::Five => Self::Five,
            serialport::DataBits::Six => Self::Six,
            serialport::DataBits::Seven => Self::Seven,
            serialport::DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<serialport::Parity> for Parity {
    fn from(parity: serialport::Parity) -> Self {
        match parity {
            serialport::Parity::None => Self::None,
            serialport::Parity::Odd => Self::Odd,
            serialport::Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<serialport::StopBits> for StopBits {
    fn from(bits: serialport::StopBits) -> Self {
        match bits {
            serialport::StopBits::One => Self::One,
            serialport::StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}

impl From<serialport::FlowControl> for FlowControl {
    fn from(flow: serialport::FlowControl) -> Self {
        match flow {
            serialport::FlowControl::None => Self::None,
            serialport::FlowControl::Hardware => Self::Hardware,
            serialport::FlowControl::Software => Self::Software,
        }
    }
}
