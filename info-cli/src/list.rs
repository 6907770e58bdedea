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

use stm32_ubl::ports::PortInfo;

use anyhow::Result;

pub fn list() -> Result<()> {
    let ports = PortInfo::list_all();
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    for port in ports {
        let mut line = format!("- `{}`", port.port.to_string_lossy());

        if let Some(usb_info) = port.usb_info {
            line.push_str(&format!(
                " {:04X}:{:04X}",
                usb_info.vid, usb_info.pid
            ));

            if let Some(manufacturer) = usb_info.manufacturer {
                line.push(' ');
                line.push_str(&manufacturer);
            }
            if let Some(product) = usb_info.product {
                line.push(' ');
                line.push_str(&product);
            }
        }

        println!("{}", line);
    }

    Ok(())
}
