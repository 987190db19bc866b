//! Print classified button actions until Ctrl+C.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example monitor -- [config.toml]
//! ```

use anyhow::Result;
use input_dispatcher::{DispatcherConfig, InputDispatcherBuilder, StartStatus};
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => DispatcherConfig::load(path)?,
        None => DispatcherConfig::default(),
    };

    let mut dispatcher = InputDispatcherBuilder::new()
        .config(config)
        .on_action(|action| {
            println!(
                "{:<8} {:<10} {}",
                action.kind.to_string(),
                action.source.role.to_string(),
                action.source.device
            );
        })
        .build();

    match dispatcher.start()? {
        StartStatus::Started { devices } => println!("Listening on {} device(s)", devices),
        StartStatus::NoDevices => {
            println!("No input devices found");
            return Ok(());
        }
        StartStatus::AlreadyRunning => {}
    }

    loop {
        std::thread::sleep(Duration::from_millis(100));
        if !dispatcher.is_running() {
            break;
        }
    }
    Ok(())
}
