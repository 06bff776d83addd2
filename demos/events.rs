use bondwatch::{event::EventFilter, Adapter, Session};

#[pollster::main]
async fn main() -> bondwatch::Result<()> {
    env_logger::builder()
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Trace)
        .init();

    let session = Session::new().await?;
    let adapter = Adapter::open(&session).await?;
    println!(
        "adapter address: {} ({:?})",
        adapter.address().await?,
        adapter.address_type().await?,
    );

    for device in adapter.bonded_devices().await? {
        println!("bonded: {:?}", device);
    }

    let mut events = adapter.event_stream(EventFilter::all()).await?;
    println!("waiting for events...");
    loop {
        println!("{:?}", events.next().await?);
    }
}
