//! Basic entropy acquisition example.
//!
//! Attaches two simulated generators next to an unrelated USB serial device,
//! initializes the driver, reads bytes from each generator and derives typed
//! values.
//!
//! Run: `RUST_LOG=debug cargo run --example basic`

use std::sync::Arc;

use meterfeeder_core::sim::SimulatedTransport;
use meterfeeder_core::{DriverConfig, MeterFeeder};

fn main() {
    env_logger::init();

    let sim = Arc::new(SimulatedTransport::new());
    sim.add_device("QWR4A001", "MED1K 1 kHz v1.0");
    sim.add_device("QWR4A002", "MED100K 100 kHz v1.0");
    sim.add_device("FT232R01", "USB Serial Converter");

    let mf = match MeterFeeder::new(sim, DriverConfig::default()) {
        Ok(mf) => mf,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let init = mf.initialize();
    if !init.is_ok() {
        eprintln!("{}", init.error_reason);
        std::process::exit(1);
    }
    println!("Generators: {}", mf.get_number_generators());

    for serial in mf.get_serial_list_generators() {
        let bytes = mf.get_bytes(16, &serial);
        if !bytes.is_ok() {
            println!("{serial}: {}", bytes.error_reason);
            continue;
        }
        print!("{serial}: ");
        for b in &bytes.value {
            print!("{b:02x}");
        }
        println!();
        println!("  int32   {}", mf.rand_int32(&serial).value);
        println!("  uniform {:.12}", mf.rand_uniform(&serial).value);
        println!("  normal  {:+.12}", mf.rand_normal(&serial).value);
    }

    let health = mf.health_report();
    println!("\n{}/{} generators open", health.open, health.total);

    mf.shutdown();
}
