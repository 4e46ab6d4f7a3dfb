use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sockvisor::{
    AdapterSet, InterfaceId, SocketConfig, SocketHooks, SocketManager, StaticAdapter,
    SystemAdapter,
};

/// Logs connection changes
struct Announce;

impl SocketHooks for Announce {
    fn on_connect(&mut self, index: usize) {
        println!("client {index} connected");
    }

    fn on_disconnect(&mut self, index: usize) {
        println!("client {index} disconnected");
    }
}

fn main() -> sockvisor::Result<()> {
    env_logger::init();

    // Usage: echo_server [port] [interface]
    let mut args = env::args().skip(1);
    let port = args
        .next()
        .map(|port| port.parse())
        .transpose()
        .map_err(|_| sockvisor::Error::config_error("port must be a number"))?
        .unwrap_or(2323);

    let adapters = match args.next() {
        Some(name) => AdapterSet::new().with(
            InterfaceId::WifiStation,
            Arc::new(SystemAdapter::lookup(&name)?),
        ),
        None => AdapterSet::new().with(InterfaceId::WifiStation, Arc::new(StaticAdapter::loopback())),
    };

    let manager = SocketManager::builder().adapters(adapters).build();
    let config = SocketConfig::server("echo", port)
        .max_connections(2)
        .crlf_to_cr(true)
        .ping(true)
        .build()?;
    let handle = manager.start(config, Announce)?;
    println!("Echo server on port {port}, try: nc 127.0.0.1 {port}");

    let mut ticks = 0u64;
    loop {
        for slot in 0..2 {
            let (Some(rx), Some(tx)) = (handle.recv_stream(slot), handle.send_stream(slot)) else {
                continue;
            };
            let data = rx.pull_vec(1024);
            if !data.is_empty() {
                tx.push(&data);
            }
        }

        ticks += 1;
        if ticks % 1000 == 0 {
            print!("{}", manager.sockets().report());
            print!("{}", manager.streams().report());
        }
        thread::sleep(Duration::from_millis(10));
    }
}
