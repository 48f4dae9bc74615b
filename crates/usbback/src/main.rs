//! The `usbback` backend daemon: parses CLI arguments, wires a
//! configuration-store seam to the connection lifecycle driver, and runs
//! the per-connection dispatch worker until the frontend closes or the
//! process receives an interrupt.
//!
//! A real deployment replaces three seams with hypervisor-backed
//! implementations: the configuration store (a xenstore watch), the ring
//! mapper (a grant-map hypercall), and the event channel binder (an
//! inter-domain event channel). None of those are available outside a
//! Xen host, so this binary drives the handshake against the in-memory
//! stand-ins `usbback-worker` already exposes for tests, acting as both
//! backend and frontend on the same process. `usbback-hostusb::SimHost`
//! plays the same role for the host USB stack itself.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use usbback_device::{Connection, DeviceMap, InMemoryGrantMapper, InMemoryTopology};
use usbback_hostusb::{ControllerSpeed, HostUsbAdapter, SimHost};
use usbback_ring::CompletionQueue;
use usbback_worker::{
    ConfigStore, ConnectionState, DispatchWorker, InMemoryConfigStore, InMemoryEventChannelBinder,
    InMemoryRingMapper, LifecycleDriver, StaticEndpointTable, WorkerWake,
};

/// Completion queue depth: one page of in-flight transfers is the most a
/// single ring can have outstanding at once, so this bounds memory
/// without ever being the thing that makes a worker block.
const COMPLETION_QUEUE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "usbback", about = "Paravirtualized USB pass-through backend daemon")]
struct Args {
    /// Physical bus number of the device to pass through.
    #[arg(long, env = "USBBACK_BUS")]
    bus: u32,

    /// Physical device number of the device to pass through.
    #[arg(long, env = "USBBACK_DEVICE")]
    device: u32,

    /// Host controller speed class to attach at: low-full, high, or super.
    #[arg(long, default_value = "high")]
    speed: String,

    /// Ring wire protocol the frontend negotiates: native, x86-32, or x86-64.
    #[arg(long, default_value = "native")]
    protocol: String,
}

fn parse_speed(value: &str) -> Result<ControllerSpeed> {
    match value {
        "low-full" | "low" | "full" => Ok(ControllerSpeed::LowFull),
        "high" => Ok(ControllerSpeed::High),
        "super" => Ok(ControllerSpeed::Super),
        other => bail!("unknown controller speed {other:?}, expected low-full, high, or super"),
    }
}

fn protocol_store_value(value: &str) -> Result<Option<&'static str>> {
    match value {
        "native" => Ok(None),
        "x86-32" | "x86_32" => Ok(Some("x86_32-abi")),
        "x86-64" | "x86_64" => Ok(Some("x86_64-abi")),
        other => bail!("unknown ring protocol {other:?}, expected native, x86-32, or x86-64"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let speed = parse_speed(&args.speed)?;
    let protocol_value = protocol_store_value(&args.protocol)?;

    let host = Arc::new(SimHost::new());
    host.register(args.bus, args.device, speed);

    let topology = Arc::new(InMemoryTopology::new(vec![(0, vec![0])]));
    let grants = Arc::new(InMemoryGrantMapper::new());
    let ring_mapper = InMemoryRingMapper::new();
    let event_channel = InMemoryEventChannelBinder::new();
    let store = InMemoryConfigStore::new();
    let device_map = Arc::new(DeviceMap::new(usbback_device::DEVICE_MAP_CAPACITY));

    let driver = LifecycleDriver::new(
        store,
        ring_mapper,
        event_channel,
        host.clone(),
        topology,
        grants.clone(),
        device_map,
    );

    driver.probe().context("probe failed")?;
    driver.store().write("physical-device", &format!("{:x}.{:x}", args.bus, args.device));
    driver.on_physical_device_changed().context("claiming physical device failed")?;

    let ring_grant_ref = 1u32;
    let ring_page = vec![0u8; usbback_ring::PAGE_SIZE];
    driver.ring_mapper().provide(ring_grant_ref, ring_page);
    driver.store().write("frontend/version", "1");
    driver.store().write("frontend/ring-ref", &ring_grant_ref.to_string());
    driver.store().write("frontend/event-channel", "1");
    if let Some(value) = protocol_value {
        driver.store().write("frontend/protocol", value);
    }

    let ring = driver.connect().context("ring connect failed")?;
    info!(bus = args.bus, device = args.device, ?speed, "backend ready");

    let completions = Arc::new(CompletionQueue::new(COMPLETION_QUEUE_CAPACITY));
    let endpoints = Arc::new(StaticEndpointTable::new());
    let connection = Arc::new(Connection::new());
    let wake = Arc::new(WorkerWake::new());
    let device = host.open(args.bus, args.device).context("device went away before worker start")?;

    let worker = Arc::new(
        DispatchWorker::new(
            ring,
            completions,
            host.clone(),
            device,
            grants,
            endpoints,
            connection.clone(),
            wake.clone(),
            Box::new(|| {}),
        )
        .context("starting dispatch worker failed")?,
    );

    let worker_for_run = worker.clone();
    let run_handle = tokio::task::spawn_blocking(move || worker_for_run.run());

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    worker.request_shutdown();
    run_handle.await.context("dispatch worker task panicked")?;

    match Arc::try_unwrap(worker) {
        Ok(worker) if driver.state() == ConnectionState::Connected => {
            let ring = worker.into_ring();
            driver.disconnect(ring, &connection).context("disconnect failed")?;
            driver.close().context("close failed")?;
            info!("connection torn down");
        }
        Ok(_) => {}
        Err(_) => warn!("worker still referenced elsewhere; skipping ring teardown"),
    }

    Ok(())
}
