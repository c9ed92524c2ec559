//! Opens the first PL2303, configures the line and prints what arrives.
//!
//! Usage: `terminal [BAUD] [MESSAGE]`

use bytes::Bytes;
use std::{
    sync::{Arc, Once},
    time::Duration,
};
use tokio::time::timeout;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pl2303::{host, DataBits, OpenOptions, Parity, StopBits};

const LISTEN: Duration = Duration::from_secs(10);

fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_log();

    let mut args = std::env::args().skip(1);
    let baud: u32 = args.next().map(|arg| arg.parse().expect("invalid baud rate")).unwrap_or(115_200);
    let message = args.next().unwrap_or_else(|| "hello from pl2303\r\n".to_string());

    let dev = host::find_device().expect("no PL2303 found");
    println!("Using device: {dev:?}");
    let hnd = Arc::new(dev.open().expect("cannot open device"));

    println!("Opening...");
    let (mut session, tx, mut rx) = host::open(hnd, OpenOptions::new()).await.expect("cannot open session");
    for (cmd, err) in session.init_report().failures() {
        println!("Initialization step ({}) failed: {err}", cmd.request);
    }
    println!("Endpoints: {:?}", session.endpoints());

    let driver = session.driver_mut();
    driver.set_baud_rate(baud).expect("cannot set baud rate");
    driver.set_data_bits(DataBits::Eight).expect("cannot set data bits");
    driver.set_stop_bits(StopBits::One).expect("cannot set stop bits");
    driver.set_parity(Parity::None).expect("cannot set parity");
    println!("Line coding: {:?}", driver.line_coding());

    tx.send(Bytes::from(message.into_bytes())).await.expect("send failed");

    println!("Listening for {} seconds...", LISTEN.as_secs());
    let listen = async {
        loop {
            match rx.recv().await {
                Ok(data) => print!("{}", String::from_utf8_lossy(&data)),
                Err(err) => {
                    println!("Receive failed: {err}");
                    break;
                }
            }
        }
    };
    let _ = timeout(LISTEN, listen).await;

    println!();
    println!("Closing...");
    session.close().expect("close failed");
}
