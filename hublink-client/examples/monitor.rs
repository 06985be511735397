//! Connects to the first hub found and logs battery telemetry for a while.
//!
//! Run with a hub plugged in:
//!
//! ```sh
//! cargo run --example monitor
//! ```

use hublink_client::protocol::notification::Notification;
use hublink_client::Hub;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let hub = Hub::discover()?;
    let conn = hub.connection();
    tokio::spawn(async move {
        let _ = conn.read_loop().await;
    });

    println!("connected to {}", hub.hub_name().await?);

    let subscription = hub.subscribe(|notification| match notification {
        Notification::Battery(battery) => {
            println!("battery {:.1} V ({}%)", battery.voltage, battery.percentage);
        }
        Notification::Button(button) if button.pressed => {
            println!("{} button pressed", button.button);
        }
        _ => {}
    });

    tokio::time::sleep(Duration::from_secs(10)).await;

    subscription.unsubscribe();
    hub.close().await?;
    Ok(())
}
