use std::{collections::BTreeSet, env, sync::Arc, thread, time::Duration};

use bondwatch::{
    device::DeviceRecord, Adapter, BluezSource, DeviceCategory, DeviceListener, DiscoveryService,
    Error, Session,
};

struct PrintDevices;

impl DeviceListener for PrintDevices {
    fn on_devices_found(&self, devices: BTreeSet<DeviceRecord>) {
        println!("{} matching device(s):", devices.len());
        for device in &devices {
            println!(
                "  {} {} {:?}{}",
                device.address(),
                device.name().unwrap_or("<unnamed>"),
                device.major_class(),
                if device.is_connected() { " (connected)" } else { "" },
            );
        }
    }

    fn on_error(&self, error: Error) {
        eprintln!("error: {}", error);
    }
}

#[pollster::main]
async fn main() -> bondwatch::Result<()> {
    env_logger::builder()
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Debug)
        .init();

    let category = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DeviceCategory::Computer,
    };

    let session = Session::new().await?;
    let adapter = match env::var("BONDWATCH_ADAPTER") {
        Ok(name) => Adapter::open_named(&session, &name).await?,
        Err(_) => Adapter::open(&session).await?,
    };
    println!(
        "adapter {} ({}), powered: {}",
        adapter.device_name(),
        adapter.address().await?,
        adapter.is_powered().await?,
    );

    let service = DiscoveryService::new(BluezSource::new(adapter), category)?;
    println!(
        "searching for {} devices ({:?})...",
        service.category(),
        service.major_classes()
    );

    thread::sleep(Duration::from_secs(5));
    service.start(Some(Arc::new(PrintDevices)))?;

    // Connect or disconnect a bonded device to see updates.
    thread::sleep(Duration::from_secs(60));
    service.stop();
    Ok(())
}
