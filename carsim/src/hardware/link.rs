use std::io::{self, BufRead, BufReader, Cursor, ErrorKind, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::{ClearBuffer, SerialPort};

use ql::prelude::QlError;

/// Receiving side of a link.
///
/// Input of a live port arrives asynchronously: after a timeout it may still deliver the reply
/// to an earlier request.
pub trait InputPort: Read {
    /// `false` for replayed recordings, where every byte answers the requests in order
    const LIVE: bool = true;

    /// Drops input, which arrived but was not read yet
    fn clear_input(&mut self) -> io::Result<()> { Ok(()) }
}

impl InputPort for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> { self.clear(ClearBuffer::Input).map_err(io::Error::from) }
}

impl<T: AsRef<[u8]>> InputPort for Cursor<T> {
    const LIVE: bool = false;
}

/// Bidirectional, line oriented connection to the device
pub struct LineLink<R: InputPort, W: Write> {
    reader: BufReader<R>,
    writer: W,
}

pub type SerialLink = LineLink<Box<dyn SerialPort>, Box<dyn SerialPort>>;

impl<R: InputPort, W: Write> LineLink<R, W> {
    pub fn new(
        reader: R,
        writer: W,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub fn writer(&self) -> &W { &self.writer }

    pub fn send(
        &mut self,
        message: &str,
    ) -> Result<(), QlError> {
        self.writer
            .write_all(message.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| QlError::protocol(format!("failed to send '{}': {}", message.trim_end(), e)))
    }

    /// Blocks until a complete line arrived (or the read timeout of the underlying port hits)
    pub fn receive_line(&mut self) -> Result<String, QlError> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Err(QlError::protocol("link closed by device")),
            Ok(_) if !line.ends_with('\n') => Err(QlError::protocol(format!("incomplete line '{}'", line))),
            Ok(_) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Err(QlError::protocol("timeout waiting for device reply"))
            }
            Err(e) => Err(QlError::protocol(format!("failed to receive: {}", e))),
        }
    }

    /// Throws away everything received so far, including buffered rest of a line, which was cut by a timeout.
    /// Afterwards the next line read is a reply to a request sent after this call.
    pub fn discard_input(&mut self) -> Result<(), QlError> {
        if !R::LIVE {
            return Ok(());
        }
        let buffered = self.reader.buffer().len();
        if buffered > 0 {
            log::debug!("discarding {} buffered bytes", buffered);
        }
        self.reader.consume(buffered);
        self.reader
            .get_mut()
            .clear_input()
            .map_err(|e| QlError::protocol(format!("failed to clear input: {}", e)))
    }

    pub fn flush(&mut self) -> Result<(), QlError> {
        self.writer
            .flush()
            .map_err(|e| QlError::protocol(format!("failed to flush: {}", e)))
    }
}

/// Opens a serial port with the given read timeout
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<SerialLink> {
    let reader = serialport::new(port, baud_rate)
        .timeout(timeout)
        .open()
        .with_context(|| format!("failed to open serial port {}", port))?;
    let writer = reader
        .try_clone()
        .with_context(|| format!("failed to clone serial port handle {}", port))?;
    log::info!("connected to {} at {} baud", port, baud_rate);
    Ok(LineLink::new(reader, writer))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct TimingOutReader;

    impl Read for TimingOutReader {
        fn read(
            &mut self,
            _buf: &mut [u8],
        ) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::TimedOut, "timed out"))
        }
    }

    impl InputPort for TimingOutReader {}

    /// Live port over a fixed input, `clear_input` drops whatever is left
    struct LivePort {
        input: Cursor<Vec<u8>>,
        cleared: usize,
    }

    impl Read for LivePort {
        fn read(
            &mut self,
            buf: &mut [u8],
        ) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl InputPort for LivePort {
        fn clear_input(&mut self) -> io::Result<()> {
            self.cleared += 1;
            self.input.set_position(self.input.get_ref().len() as u64);
            Ok(())
        }
    }

    #[test]
    fn test_send_and_receive() -> Result<(), QlError> {
        let mut link = LineLink::new(Cursor::new(b"a,b\r\nc\n".to_vec()), Vec::new());
        link.send("2\n")?;
        link.send("-1\n")?;
        assert_eq!(link.writer(), b"2\n-1\n");
        assert_eq!(link.receive_line()?, "a,b");
        assert_eq!(link.receive_line()?, "c");
        assert!(matches!(link.receive_line(), Err(QlError::Protocol(_))));
        Ok(())
    }

    #[test]
    fn test_incomplete_line() {
        let mut link = LineLink::new(Cursor::new(b"0.1,0.2".to_vec()), Vec::new());
        assert!(matches!(link.receive_line(), Err(QlError::Protocol(_))));
    }

    #[test]
    fn test_discard_input() -> Result<(), QlError> {
        let input = Cursor::new(b"1,1,0\n0.5,2.0,1\n".to_vec());
        let mut link = LineLink::new(
            LivePort {
                input,
                cleared: 0,
            },
            Vec::new(),
        );
        assert_eq!(link.receive_line()?, "1,1,0");
        // the second line sits in the read buffer
        link.discard_input()?;
        assert_eq!(link.reader.get_ref().cleared, 1);
        assert!(matches!(link.receive_line(), Err(QlError::Protocol(msg)) if msg.contains("closed")));
        Ok(())
    }

    #[test]
    fn test_discard_input_keeps_recordings() -> Result<(), QlError> {
        let mut link = LineLink::new(Cursor::new(b"a\nb\n".to_vec()), Vec::new());
        assert_eq!(link.receive_line()?, "a");
        link.discard_input()?;
        assert_eq!(link.receive_line()?, "b");
        Ok(())
    }

    #[test]
    fn test_timeout() {
        let mut link = LineLink::new(TimingOutReader, Vec::new());
        let r = link.receive_line();
        assert!(matches!(&r, Err(QlError::Protocol(msg)) if msg.contains("timeout")));
    }
}
