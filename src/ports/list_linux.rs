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

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use super::{PortInfo, PortUsbInfo};

const DEV_PATTERNS: &[&str] = &[
    "/dev/ttyS*",     // Built-in serial ports
    "/dev/ttyUSB*",   // usb-serial with own driver
    "/dev/ttyACM*",   // usb-serial with CDC-ACM profile
    "/dev/ttyAMA*",   // ARM internal port (raspi)
    "/dev/rfcomm*",   // BT serial devices
];

pub fn list_all() -> Vec<PortInfo> {
    let mut available = Vec::new();

    for pattern in DEV_PATTERNS {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(_) => continue,
        };

        for path in paths.filter_map(Result::ok) {
            if let Some(info) = port_info(&path) {
                available.push(info);
            }
        }
    }

    available
}

/// Read a single sysfs attribute, trimmed.
fn attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_owned())
}

fn attr_hex_u16(dir: &Path, name: &str) -> Option<u16> {
    u16::from_str_radix(&attr(dir, name)?, 16).ok()
}

fn port_info(port: &Path) -> Option<PortInfo> {
    let name = port.file_name()?.to_owned();

    let device_path = PathBuf::from("/sys/class/tty")
        .join(&name)
        .join("device");

    let subsystem = fs::canonicalize(device_path.join("subsystem"))
        .ok()
        .and_then(|p| p.file_name().map(|s| s.to_owned()));

    // Skip internal (platform) serial ports, they can't be the adapter.
    if subsystem.as_deref() == Some("platform".as_ref()) {
        return None;
    }

    let usb_interface = match subsystem {
        Some(ref s) if s == "usb-serial" => {
            let mut dir = fs::canonicalize(&device_path).ok()?;
            dir.pop();
            Some(dir)
        }
        Some(ref s) if s == "usb" => Some(device_path),
        _ => None,
    };

    let usb_info = usb_interface.and_then(|interface| {
        let mut device = interface;
        device.pop();

        Some(PortUsbInfo {
            vid: attr_hex_u16(&device, "idVendor")?,
            pid: attr_hex_u16(&device, "idProduct")?,
            serial: attr(&device, "serial"),
            manufacturer: attr(&device, "manufacturer"),
            product: attr(&device, "product"),
        })
    });

    Some(PortInfo {
        port: OsString::from(port),
        name,
        usb_info,
    })
}
