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

//! # Utilities
//!
//! Convenience reads for well-known device registers, layered on the
//! custom register-read extension of [`Session`](crate::Session).

use serial::SerialPort;

use crate::{ProtocolError, Session};

/// DBG_IDCODE register, holds the device ID and the revision.
pub const DBG_IDCODE_ADDR: u32 = 0x4001_5800;
/// Start of the unique device identifier block.
pub const UID_ADDR: u32 = 0x1FFF_0E00;
/// Size of the unique identifier block in bytes.
pub const UID_LEN: u16 = 16;

const REG32_SIZE: u16 = 4;

/// Read and decode the DBG_IDCODE register.
pub fn read_device_id<P>(
    session: &mut Session<P>,
) -> Result<u32, ProtocolError>
where
    P: SerialPort,
{
    let raw = session.read_memory(DBG_IDCODE_ADDR, REG32_SIZE)?;

    let mut reg = [0u8; REG32_SIZE as usize];
    reg.copy_from_slice(&raw);

    Ok(u32::from_le_bytes(reg))
}

/// Fetch the raw unique-identifier block. Formatting is left to the
/// caller.
pub fn read_uid<P>(
    session: &mut Session<P>,
) -> Result<[u8; UID_LEN as usize], ProtocolError>
where
    P: SerialPort,
{
    let raw = session.read_memory(UID_ADDR, UID_LEN)?;

    let mut uid = [0u8; UID_LEN as usize];
    uid.copy_from_slice(&raw);

    Ok(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test::ScriptedPort;

    #[test]
    fn test_read_device_id() {
        let mut session =
            Session::new(ScriptedPort::new(&[0x04, 0x15, 0x01, 0x40]));

        // Little-endian interpretation of the register bytes.
        assert_eq!(read_device_id(&mut session).unwrap(), 0x4001_1504);
        assert_eq!(
            session.into_port().written(),
            &[0x11, 0x00, 0x58, 0x01, 0x40]
        );
    }

    #[test]
    fn test_read_uid() {
        let block: Vec<u8> = (0u8..16).collect();
        let mut session = Session::new(ScriptedPort::new(&block));

        let uid = read_uid(&mut session).unwrap();

        assert_eq!(&uid[..], &block[..]);
        assert_eq!(
            session.into_port().written(),
            &[0x11, 0x00, 0x0E, 0xFF, 0x1F]
        );
    }

    #[test]
    fn test_read_uid_truncated_reply() {
        let mut session = Session::new(ScriptedPort::new(&[0u8; 10]));

        assert!(matches!(
            read_uid(&mut session),
            Err(ProtocolError::ShortRead {
                expected: 16,
                got: 10,
            })
        ));
    }
}
