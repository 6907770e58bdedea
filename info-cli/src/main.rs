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

#[cfg(windows)]
use std::ffi::OsString;
use std::{path::PathBuf, time::Duration};

use serial::SerialPort;
use stm32_ubl::Session;

use anyhow::{Context, Result};
use clap::{
    crate_authors, crate_version, App, AppSettings, Arg, ArgMatches,
    SubCommand,
};

mod list;

#[cfg(unix)]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";
#[cfg(windows)]
const DEFAULT_PORT: &str = "COM0";

fn main() -> Result<()> {
    #[cfg(feature = "pretty-env-logger")]
    pretty_env_logger::init_custom_env("STM32_UBL_LOG");
    #[cfg(not(feature = "pretty-env-logger"))]
    env_logger::init_from_env("STM32_UBL_LOG");

    let args = cli().get_matches_safe()?;

    // Listing ports doesn't need one opened.
    if let ("list", Some(_)) = args.subcommand() {
        return list::list();
    }

    if args.subcommand_name().is_none() {
        println!("Error: Sub-command required");
        println!("{}", args.usage());
        return Ok(());
    }

    let opts = GlobalOpts::from_matches(&args)?;

    log::info!("Opening serial port `{}`", opts.port_to_string());
    log::info!("Baudrate: {}", baudrate_to_usize(opts.baudrate));
    let mut port =
        serial::SystemPort::open(&opts.port).with_context(|| {
            format!("Couldn't open serial port `{}`", opts.port_to_string())
        })?;

    let mut settings = stm32_ubl::port_settings();
    settings.baud_rate = opts.baudrate;

    port.set_timeout(opts.timeout)?;
    port.configure(&settings)?;

    let mut session = Session::new(port);

    match args.subcommand() {
        ("info", Some(_)) => info(&mut session)?,
        ("device-id", Some(_)) => {
            let id = stm32_ubl::util::read_device_id(&mut session)
                .context("Couldn't read the device ID register")?;
            println!("Device ID: 0x{:08X}", id);
        }
        ("uid", Some(_)) => {
            let uid = stm32_ubl::util::read_uid(&mut session)
                .context("Couldn't read the unique identifier block")?;
            println!("UID: {}", format_hex(&uid));
        }
        ("read", Some(m)) => read(m, &mut session)?,
        _ => unreachable!(),
    }

    Ok(())
}

/// Info subcommand: the standard bootloader command set.
fn info<P>(session: &mut Session<P>) -> Result<()>
where
    P: SerialPort,
{
    log::info!("Entering bootloader");
    session.enter().context(
        "No response from the bootloader. Ensure the device is in boot mode",
    )?;

    let version = session
        .get_version()
        .context("Couldn't read the bootloader version")?;
    println!("Bootloader version: 0x{:02X}", version);

    let chip_id = session
        .get_chip_id()
        .context("Couldn't read the chip ID")?;
    println!("Chip ID: 0x{:04X}", chip_id);

    Ok(())
}

/// Read subcommand: raw register read at an arbitrary address.
fn read<P>(matches: &ArgMatches<'_>, session: &mut Session<P>) -> Result<()>
where
    P: SerialPort,
{
    let address = parse_hex_u32(matches.value_of("address").unwrap())?;
    let length: u16 = matches
        .value_of("length")
        .unwrap()
        .parse()
        .context("Invalid length, must be a byte count, e.g.: 16")?;

    log::info!("Reading {} bytes at {:#010X}", length, address);
    let data = session
        .read_memory(address, length)
        .with_context(|| format!("Couldn't read memory at {:#010X}", address))?;

    println!("{}", format_hex(&data));

    Ok(())
}

struct GlobalOpts {
    #[cfg(unix)]
    port: PathBuf,
    #[cfg(windows)]
    port: OsString,
    baudrate: serial::BaudRate,
    timeout: Duration,
}

impl GlobalOpts {
    pub fn from_matches(args: &ArgMatches<'_>) -> Result<GlobalOpts> {
        Ok(GlobalOpts {
            #[cfg(unix)]
            port: args.value_of("port").unwrap().parse()?,
            #[cfg(windows)]
            port: OsString::from(args.value_of("port").unwrap()),
            baudrate: parse_baudrate(args.value_of("baudrate").unwrap())?,
            timeout: Duration::from_millis(
                args.value_of("timeout-ms")
                    .unwrap()
                    .parse()
                    .context("Invalid timeout, must be in milliseconds")?,
            ),
        })
    }

    pub fn port_to_string(&self) -> String {
        #[cfg(unix)]
        let port = self.port.display().to_string();
        #[cfg(windows)]
        let port = self.port.to_string_lossy().into_owned();

        port
    }
}

fn parse_baudrate(s: &str) -> Result<serial::BaudRate> {
    let baudrate = s
        .parse::<usize>()
        .context("Invalid baudrate, must be a number, e.g.: 115200")?;

    Ok(match baudrate {
        110 => serial::BaudRate::Baud110,
        300 => serial::BaudRate::Baud300,
        600 => serial::BaudRate::Baud600,
        1200 => serial::BaudRate::Baud1200,
        2400 => serial::BaudRate::Baud2400,
        4800 => serial::BaudRate::Baud4800,
        9600 => serial::BaudRate::Baud9600,
        19200 => serial::BaudRate::Baud19200,
        38400 => serial::BaudRate::Baud38400,
        57600 => serial::BaudRate::Baud57600,
        115200 => serial::BaudRate::Baud115200,
        n => serial::BaudRate::BaudOther(n),
    })
}

fn baudrate_to_usize(baudrate: serial::BaudRate) -> usize {
    match baudrate {
        serial::BaudRate::Baud110 => 110,
        serial::BaudRate::Baud300 => 300,
        serial::BaudRate::Baud600 => 600,
        serial::BaudRate::Baud1200 => 1200,
        serial::BaudRate::Baud2400 => 2400,
        serial::BaudRate::Baud4800 => 4800,
        serial::BaudRate::Baud9600 => 9600,
        serial::BaudRate::Baud19200 => 19200,
        serial::BaudRate::Baud38400 => 38400,
        serial::BaudRate::Baud57600 => 57600,
        serial::BaudRate::Baud115200 => 115200,
        serial::BaudRate::BaudOther(n) => n,
    }
}

fn parse_hex_u32(s: &str) -> Result<u32> {
    let digits = s.trim_start_matches("0x");

    u32::from_str_radix(digits, 16).context(
        "Invalid address, must be an hexadecimal number, e.g.: 0x40015800",
    )
}

fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{:02X}", byte));
    }

    out
}

fn cli() -> App<'static, 'static> {
    let app = App::new("STM32 UART Bootloader Info")
        .usage("stm32-ubl-info [OPTIONS] [SUBCOMMAND]")
        .setting(AppSettings::ColoredHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Reads chip information through the STM32 factory UART bootloader")
        .arg(
            opt("port", "Serial port to use")
                .short("p")
                .required(true)
                .default_value(DEFAULT_PORT)
        )
        .arg(
            opt("baudrate", "Serial port baudrate")
                .short("b")
                .required(true)
                .default_value("115200")
        )
        .arg(
            opt("timeout-ms", "Per-read timeout, in milliseconds")
                .short("t")
                .required(true)
                .default_value("1000")
        )
        .subcommand(
            SubCommand::with_name("info")
                .about("Enter the bootloader and read its version and the chip ID")
                .setting(AppSettings::ColoredHelp)
        )
        .subcommand(
            SubCommand::with_name("device-id")
                .about("Read the DBG_IDCODE register through the custom read extension")
                .setting(AppSettings::ColoredHelp)
        )
        .subcommand(
            SubCommand::with_name("uid")
                .about("Read the 16-byte unique identifier block")
                .setting(AppSettings::ColoredHelp)
        )
        .subcommand(
            SubCommand::with_name("read")
                .about("Read raw bytes from a memory address")
                .setting(AppSettings::ColoredHelp)
                .arg(
                    opt(
                        "address",
                        "Address to read from, hexadecimal, e.g.: 0x40015800"
                    )
                        .short("a")
                        .required(true)
                        .takes_value(true)
                )
                .arg(
                    opt("length", "Number of bytes to read")
                        .short("n")
                        .required(true)
                        .default_value("4")
                )
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("List the serial ports available on the system")
                .setting(AppSettings::ColoredHelp)
        );

    // When double clicking the binary the binary will be paused. Useful on
    // windows, since the Console window will be closed inmediately.
    #[cfg(windows)]
    let app = app.setting(AppSettings::WaitOnError);

    app
}

fn opt(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name).long(name).help(help)
}
