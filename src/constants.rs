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

/// Sync byte, written once to enter bootloader mode.
pub const SYNC: u8              = 0x7F;

/// ACK byte
pub const ACK: u8               = 0x79;
/// NACK byte
pub const NACK: u8              = 0x1F;

pub const CMD_GET_VERSION: u8   = 0x01;
pub const CMD_GET_ID: u8        = 0x02;

/// Register read extension implemented by custom firmware, not the ROM
/// bootloader. Framed differently from the commands above: opcode plus a
/// little-endian 32-bit address, no checksum byte, raw reply.
pub const CMD_READ_REGISTER: u8 = 0x11;
