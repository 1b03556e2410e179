mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{HomeSim, Scenario};

/// Parse a comma-separated sensor list, dropping blanks.
fn parse_sensors(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn now_unix_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let base_topic = env::var("BASE_TOPIC").unwrap_or_else(|_| "zigbee2mqtt".to_string());
    let sensors = parse_sensors(
        &env::var("SENSORS").unwrap_or_else(|_| "basement,sump-leak".to_string()),
    );
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    let scenario = Scenario::from_str_lossy(&env::var("SCENARIO").unwrap_or_default());
    // Short default day so the diurnal swing shows up during a dev session.
    let diurnal_period_s: f64 = env::var("DIURNAL_PERIOD_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3600.0);

    if sensors.is_empty() {
        anyhow::bail!("SENSORS is empty; nothing to simulate");
    }

    let mut mqttoptions = MqttOptions::new(format!("pihome-node-{}", fastrand::u32(..)), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    // We only publish, but the event loop must run to keep the connection up.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("node connected to mqtt"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt error, retrying");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let mut sim = HomeSim::new(scenario, &sensors, diurnal_period_s);
    info!(%scenario, sensors = ?sensors, %base_topic, every_s = sample_every_s, "simulating");

    loop {
        let now = now_unix_f64();
        for i in 0..sim.sensor_count() {
            let report = sim.sample(i, now);
            let topic = format!("{base_topic}/{}", sim.name(i));
            let payload = serde_json::to_vec(&report)?;
            match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(()) => debug!(%topic, ?report, "published"),
                Err(e) => warn!(%topic, error = %e, "publish error"),
            }
        }
        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
