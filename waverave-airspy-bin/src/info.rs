use clap::Args;
use color_eyre::eyre::Context;
use waverave_airspy::list_devices;

/// Retrieve as much info as possible from each attached receiver.
#[derive(Args, Debug)]
pub struct Cmd {}

impl Cmd {
    pub fn cmd(&self, filter_serial: Option<u64>) -> color_eyre::Result<()> {
        println!("Binary release {}", env!("CARGO_PKG_VERSION"));
        println!("Library release {}", waverave_airspy::lib_version());

        let mut found = false;
        for dev in list_devices().wrap_err("Couldn't enumerate receivers")? {
            let usb_serial = dev
                .serial_str()
                .map(|s| s.to_owned())
                .unwrap_or_else(|| String::from("Unknown"));

            if filter_serial.is_some() && dev.serial() != filter_serial {
                continue;
            }
            found = true;

            let family = dev.family();
            let rf = match dev.open() {
                Ok(rf) => rf,
                Err(e) => {
                    println!("Couldn't open {family}, serial {usb_serial}: {e}");
                    continue;
                }
            };

            println!();
            println!("Found {}, USB serial {usb_serial}", rf.family());

            let info = rf.info();
            match info.board_id() {
                Ok(id) => println!("Board ID: {id}"),
                Err(_) => println!("Board ID: ❌ Failed to retrieve"),
            }
            let version = info
                .version_string()
                .unwrap_or_else(|_| String::from("❌ Failed to retrieve"));
            println!("Firmware Version: {version}");
            match info.part_id_serial() {
                Ok(p) => {
                    println!(
                        "Part ID Number: 0x{:08X} 0x{:08X}",
                        p.part_id[0], p.part_id[1]
                    );
                    println!("Serial Number: 0x{:016X}", p.serial());
                }
                Err(_) => {
                    println!("Part ID Number: ❌ Failed to retrieve");
                    println!("Serial Number: ❌ Failed to retrieve");
                }
            }
            println!("Supported sample rates:");
            for rate in rf.sample_rates() {
                println!("    {:.6} MSPS", rate as f64 * 1e-6);
            }

            if let Err(e) = rf.close() {
                println!("Close: ❌ {e}");
            }
        }

        if !found {
            if let Some(serial) = filter_serial {
                println!("Unable to locate a receiver with serial number {serial:016X}");
            } else {
                println!("Couldn't find any receivers");
            }
        }
        Ok(())
    }
}
