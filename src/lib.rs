// Copyright 2024 stm32-ubl contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # STM32 UART bootloader session library
//!
//! This is a library to talk to the serial interface of the STM32 factory
//! UART bootloader: entry sync, get-version and get-chip-id, plus a
//! register-read extension implemented by custom companion firmware.
//!
//! The protocol is strictly request/response, one command at a time over
//! one serial connection. The caller opens and configures the port, hands
//! it to a [`Session`], and closes the port when the session is done.
//!
//! # See also
//!
//! - [AN3155: USART protocol used in the STM32 bootloader](https://www.st.com/resource/en/application_note/cd00264342.pdf)

use std::{fmt, io, time::Duration};

use serial::SerialPort;
use thiserror::Error;

#[rustfmt::skip]
pub mod constants;
pub mod ports;
pub mod util;

use crate::constants::{ACK, CMD_GET_ID, CMD_GET_VERSION, CMD_READ_REGISTER, SYNC};

/// Default per-read timeout. Set it on the port with
/// [`serial::SerialPort::set_timeout`] before constructing a [`Session`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The entry sync byte went unanswered, or the reply was not an ACK.
    /// Either the device is not in bootloader mode, or it is already
    /// synchronized and NACKed the second sync attempt.
    #[error("no response to bootloader entry")]
    NoResponse,

    /// A standard command was not acknowledged. An explicit NACK and a
    /// reply timeout are indistinguishable here, the wire carries no
    /// sentinel for "nothing arrived".
    #[error("command not acknowledged")]
    Nacked,

    /// A read completed with fewer bytes than the protocol requires.
    #[error("short read, expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The underlying serial channel failed. Always fatal.
    #[error("serial transport error")]
    Transport(#[from] io::Error),
}

/// A bootloader session over an already opened and configured serial
/// port.
///
/// One session exclusively owns one port for its whole lifetime. There is
/// no pipelining: a `Session` must not be shared between threads without
/// external serialization.
pub struct Session<P> {
    port: P,
    synchronized: bool,
}

impl<P> Session<P>
where
    P: SerialPort,
{
    /// Create a new session. Performs no I/O; call [`Session::enter`]
    /// before issuing standard commands.
    pub fn new(port: P) -> Self {
        Session {
            port,
            synchronized: false,
        }
    }

    /// Whether the entry handshake has completed.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Consume the session and hand the port back to the caller.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Enter bootloader mode.
    ///
    /// Writes the sync byte and waits for a single ACK, one write and one
    /// bounded read, no retries. On failure the session stays
    /// unsynchronized and usable for a fresh attempt.
    pub fn enter(&mut self) -> Result<(), ProtocolError> {
        log::trace!("sending sync byte {:#04X}", SYNC);
        self.port.write_all(&[SYNC])?;
        self.port.flush()?;

        match self.read_reply_byte()? {
            Some(ACK) => {
                log::trace!("bootloader acknowledged sync");
                self.synchronized = true;
                Ok(())
            }
            Some(other) => {
                log::trace!("unexpected sync reply {:#04X}", other);
                Err(ProtocolError::NoResponse)
            }
            None => {
                log::trace!("sync reply timed out");
                Err(ProtocolError::NoResponse)
            }
        }
    }

    /// Issue a standard framed command and wait for its ACK.
    ///
    /// Writes the opcode followed by its one's-complement checksum. Any
    /// reply other than an ACK, including no reply at all, is reported as
    /// [`ProtocolError::Nacked`]; the session stays synchronized either
    /// way.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful [`Session::enter`].
    pub fn send_command(&mut self, opcode: u8) -> Result<(), ProtocolError> {
        // Logic error, just panic.
        assert!(
            self.synchronized,
            "standard command issued before bootloader entry"
        );

        log::trace!("sending cmd {:#04X}", opcode);
        self.port.write_all(&[opcode, opcode ^ 0xFF])?;
        self.port.flush()?;

        match self.read_reply_byte()? {
            Some(ACK) => Ok(()),
            _ => Err(ProtocolError::Nacked),
        }
    }

    /// Read the bootloader version.
    ///
    /// The reply is a length byte, the version byte, `length` further
    /// bytes (the option bytes, discarded) and a trailing ACK
    /// (discarded). This byte-consumption order is load-bearing, keep it
    /// in sync with real device behavior before touching it.
    pub fn get_version(&mut self) -> Result<u8, ProtocolError> {
        self.send_command(CMD_GET_VERSION)?;

        let length = self.read_u8()?;
        let version = self.read_u8()?;

        let mut options = vec![0u8; usize::from(length)];
        self.read_exact(&mut options)?;
        let _ack = self.read_u8()?;

        log::trace!("bootloader version {:#04X}", version);
        Ok(version)
    }

    /// Read the 16-bit product ID of the chip.
    pub fn get_chip_id(&mut self) -> Result<u16, ProtocolError> {
        self.send_command(CMD_GET_ID)?;

        // Reported as 1, meaning two ID bytes follow. Not validated.
        let _length = self.read_u8()?;

        let mut id = [0u8; 2];
        self.read_exact(&mut id)?;
        let _ack = self.read_u8()?;

        let id = u16::from_be_bytes(id);
        log::trace!("chip id {:#06X}", id);
        Ok(id)
    }

    /// Read `length` bytes starting at `address` through the custom
    /// register-read extension.
    ///
    /// This is a distinct sub-protocol carried over the same port: one
    /// opcode byte and a little-endian 32-bit address, no checksum byte,
    /// and a raw unframed reply. It bypasses the sync handshake entirely
    /// and may be issued on an unsynchronized session.
    pub fn read_memory(
        &mut self,
        address: u32,
        length: u16,
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut cmd = [0u8; 5];
        cmd[0] = CMD_READ_REGISTER;
        cmd[1..].copy_from_slice(&address.to_le_bytes());

        log::trace!("reading {} bytes at {:#010X}", length, address);
        self.port.write_all(&cmd)?;
        self.port.flush()?;

        let mut data = vec![0u8; usize::from(length)];
        self.read_exact(&mut data)?;

        Ok(data)
    }

    /// Read a single byte, mapping a timeout to `None` so the caller can
    /// tell "nothing arrived" apart from a transport failure.
    fn read_reply_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(ProtocolError::Transport(e)),
        }
    }

    /// Fill `buf` completely or fail with a short read. A device that
    /// announces more bytes than it sends ends up here once the timeout
    /// elapses.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let mut got = 0;
        while got < buf.len() {
            match self.port.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(ProtocolError::Transport(e)),
            }
        }

        if got < buf.len() {
            return Err(ProtocolError::ShortRead {
                expected: buf.len(),
                got,
            });
        }

        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

impl<P> fmt::Debug for Session<P>
where
    P: SerialPort,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Session")
            .field("synchronized", &self.synchronized)
            .field("port", &())
            .finish()
    }
}

/// Default serial port settings for the bootloader: 115200 8N1, no flow
/// control. Only the baudrate is worth changing.
pub fn port_settings() -> serial::PortSettings {
    serial::PortSettings {
        baud_rate: serial::BaudRate::Baud115200,
        char_size: serial::CharSize::Bits8,
        parity: serial::Parity::ParityNone,
        stop_bits: serial::StopBits::Stop1,
        flow_control: serial::FlowControl::FlowNone,
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    use std::collections::VecDeque;

    use crate::constants::NACK;

    /// Serial port stand-in fed with a scripted reply stream. Reads drain
    /// the script and time out once it is exhausted; every written byte
    /// is recorded.
    pub struct ScriptedPort {
        reply: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl ScriptedPort {
        pub fn new(reply: &[u8]) -> Self {
            ScriptedPort {
                reply: reply.iter().copied().collect(),
                written: Vec::new(),
            }
        }

        /// Scripted reply bytes not yet consumed.
        pub fn remaining(&self) -> usize {
            self.reply.len()
        }

        pub fn written(&self) -> &[u8] {
            &self.written
        }
    }

    impl io::Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.reply.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "scripted reply exhausted",
                ));
            }

            let mut filled = 0;
            while filled < buf.len() {
                match self.reply.pop_front() {
                    Some(byte) => {
                        buf[filled] = byte;
                        filled += 1;
                    }
                    None => break,
                }
            }

            Ok(filled)
        }
    }

    impl io::Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[allow(bare_trait_objects)]
    impl SerialPort for ScriptedPort {
        fn timeout(&self) -> Duration {
            DEFAULT_TIMEOUT
        }
        fn set_timeout(&mut self, _timeout: Duration) -> serial::Result<()> {
            Ok(())
        }
        fn configure(
            &mut self,
            _settings: &serial::PortSettings,
        ) -> serial::Result<()> {
            Ok(())
        }
        fn reconfigure(
            &mut self,
            _setup: &Fn(&mut serial::SerialPortSettings) -> serial::Result<()>,
        ) -> serial::Result<()> {
            Ok(())
        }
        fn set_rts(&mut self, _level: bool) -> serial::Result<()> {
            Ok(())
        }
        fn set_dtr(&mut self, _level: bool) -> serial::Result<()> {
            Ok(())
        }
        fn read_cts(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
        fn read_dsr(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
        fn read_ri(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
        fn read_cd(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
    }

    /// Session with the entry handshake already scripted and completed;
    /// `reply` is the stream the command under test will consume.
    fn synchronized_session(reply: &[u8]) -> Session<ScriptedPort> {
        let mut script = vec![ACK];
        script.extend_from_slice(reply);

        let mut session = Session::new(ScriptedPort::new(&script));
        session.enter().unwrap();
        session
    }

    #[test]
    fn test_enter_ack() {
        let mut session = Session::new(ScriptedPort::new(&[ACK]));

        session.enter().unwrap();

        assert!(session.is_synchronized());
        assert_eq!(session.port.written(), &[SYNC]);
    }

    #[test]
    fn test_enter_timeout() {
        let mut session = Session::new(ScriptedPort::new(&[]));

        assert!(matches!(
            session.enter(),
            Err(ProtocolError::NoResponse)
        ));
        assert!(!session.is_synchronized());
    }

    #[test]
    fn test_enter_unexpected_byte() {
        // A NACK here usually means the device was already synchronized.
        let mut session = Session::new(ScriptedPort::new(&[NACK]));

        assert!(matches!(
            session.enter(),
            Err(ProtocolError::NoResponse)
        ));
        assert!(!session.is_synchronized());
    }

    #[test]
    fn test_command_framing() {
        for opcode in [0x00u8, 0x01, 0x02, 0x11, 0x43, 0x73, 0xFF].iter() {
            let mut session = synchronized_session(&[ACK]);

            session.send_command(*opcode).unwrap();

            // written[0] is the sync byte from the handshake.
            assert_eq!(
                &session.port.written()[1..],
                &[*opcode, *opcode ^ 0xFF]
            );
        }
    }

    #[test]
    fn test_command_nack() {
        let mut session = synchronized_session(&[NACK]);

        assert!(matches!(
            session.send_command(CMD_GET_VERSION),
            Err(ProtocolError::Nacked)
        ));

        // The session stays usable for further commands.
        assert!(session.is_synchronized());
    }

    #[test]
    fn test_command_timeout_reported_as_nack() {
        let mut session = synchronized_session(&[]);

        assert!(matches!(
            session.send_command(CMD_GET_ID),
            Err(ProtocolError::Nacked)
        ));
        assert!(session.is_synchronized());
    }

    #[test]
    #[should_panic]
    fn test_command_before_entry_panics() {
        let mut session = Session::new(ScriptedPort::new(&[ACK]));
        let _ = session.send_command(CMD_GET_VERSION);
    }

    #[test]
    fn test_get_version() {
        // cmd-ack, length = 1, version, one option byte, trailing ack.
        let mut session =
            synchronized_session(&[ACK, 0x01, 0xAA, 0x00, ACK]);

        assert_eq!(session.get_version().unwrap(), 0xAA);

        // Exactly five bytes consumed from the command-reply stream.
        assert_eq!(session.port.remaining(), 0);
    }

    #[test]
    fn test_get_version_idempotent() {
        let reply = [ACK, 0x01, 0xAA, 0x00, ACK];
        let mut script = Vec::new();
        script.extend_from_slice(&reply);
        script.extend_from_slice(&reply);

        let mut session = synchronized_session(&script);

        assert_eq!(session.get_version().unwrap(), 0xAA);
        assert_eq!(session.get_version().unwrap(), 0xAA);
        assert_eq!(session.port.remaining(), 0);
    }

    #[test]
    fn test_get_version_short_read() {
        // Length byte announces five option bytes that never arrive.
        let mut session = synchronized_session(&[ACK, 0x05, 0xAA]);

        assert!(matches!(
            session.get_version(),
            Err(ProtocolError::ShortRead {
                expected: 5,
                got: 0,
            })
        ));
    }

    #[test]
    fn test_get_chip_id() {
        // cmd-ack, length = 1, two big-endian ID bytes, trailing ack.
        let mut session =
            synchronized_session(&[ACK, 0x01, 0x04, 0x30, ACK]);

        assert_eq!(session.get_chip_id().unwrap(), 0x0430);
        assert_eq!(session.port.remaining(), 0);
    }

    #[test]
    fn test_read_memory_framing() {
        // No enter(): the extension bypasses the handshake.
        let mut session =
            Session::new(ScriptedPort::new(&[0x04, 0x15, 0x01, 0x40]));

        let data = session.read_memory(0x4001_5800, 4).unwrap();

        assert_eq!(
            session.port.written(),
            &[CMD_READ_REGISTER, 0x00, 0x58, 0x01, 0x40]
        );
        assert_eq!(data, vec![0x04, 0x15, 0x01, 0x40]);
    }

    #[test]
    fn test_read_memory_short_read() {
        let partial = [0u8; 10];
        let mut session = Session::new(ScriptedPort::new(&partial));

        assert!(matches!(
            session.read_memory(0x1FFF_0E00, 16),
            Err(ProtocolError::ShortRead {
                expected: 16,
                got: 10,
            })
        ));
    }
}
