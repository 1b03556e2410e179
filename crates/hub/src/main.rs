mod alarm;
mod config;
mod db;
mod device;
mod float_switch;
mod mail;
mod mqtt;
mod recorder;
mod scheduler;
mod solar;
mod state;
mod telemetry;
mod web;

use anyhow::{Context, Result};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use alarm::AlarmTracker;
use db::Db;
use float_switch::FloatSwitch;
use mail::{Mailer, Notifier};
use mqtt::{sensor_topic, Publisher};
use scheduler::{ScheduleEngine, Scheduler};
use solar::SolarClock;
use state::{SharedState, SystemState};
use telemetry::TelemetryIngest;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "pi-home.toml".to_string());
    let cfg = config::load(&config_path)?;

    // RUST_LOG wins over the config file.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(path = %config_path, city = %cfg.city, "config loaded");

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.database).await?;
    db.migrate().await?;
    info!(url = %cfg.database, "db ready");

    // ── Shared state (ephemeral, for the web UI) ────────────────────
    let shared: SharedState = Arc::new(RwLock::new(SystemState::new()));
    shared.write().await.record_system("hub started".to_string());

    let mailer = Mailer::new(&cfg.mail)?;
    if !mailer.enabled() {
        shared
            .write()
            .await
            .record_system("mail alerts disabled (no recipient)".to_string());
    }
    let notifier: Arc<dyn Notifier> = Arc::new(mailer);

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    // Sized so the whole startup sync fits before the event loop runs.
    let groups = cfg.device_groups();
    let capacity = mqtt::request_capacity(&groups, cfg.sensors.len());
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, capacity);
    debug!(capacity, "mqtt request channel sized");
    let publisher: Arc<dyn Publisher> = Arc::new(client.clone());
    let base_topic = cfg.mqtt.base_topic.clone();
    if cfg.sensors.is_empty() {
        warn!("no sensors configured, telemetry will be ignored");
    }

    // ── Scheduler ───────────────────────────────────────────────────
    let tz = cfg.tz();
    let solar = SolarClock::new(&cfg.city, tz);
    if !solar.is_known() {
        shared.write().await.record_error(format!(
            "unknown city '{}', dusk and dawn fall back to 17:00",
            cfg.city
        ));
    }
    let engine = ScheduleEngine::new(
        groups,
        solar,
        &base_topic,
        Arc::clone(&publisher),
    );
    let scheduler = Scheduler::new(engine, Arc::clone(&shared));
    scheduler.start(Utc::now()).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(scheduler::run(scheduler.clone(), shutdown_rx.clone())));

    // ── Recorder ────────────────────────────────────────────────────
    tasks.push(tokio::spawn(recorder::run(
        db.clone(),
        Arc::clone(&shared),
        Duration::from_secs(cfg.sample_period_sec),
        shutdown_rx.clone(),
    )));

    // ── Web server ──────────────────────────────────────────────────
    if cfg.web.enabled {
        let web_state = web::AppState {
            shared: Arc::clone(&shared),
            scheduler: scheduler.clone(),
            db: db.clone(),
            notifier: Arc::clone(&notifier),
        };
        let port = cfg.web.port;
        tokio::spawn(async move {
            web::serve(web_state, port).await;
        });
    }

    // ── Float switch ────────────────────────────────────────────────
    let float_switch = match &cfg.float_switch {
        Some(fs) => Some(FloatSwitch::new(fs).context("failed to set up float switch")?),
        None => None,
    };
    let poll_ms = cfg.float_switch.as_ref().map_or(1000, |fs| fs.poll_ms);
    let mut switch_tick = tokio::time::interval(Duration::from_millis(poll_ms));
    let sump_samples = cfg.float_switch.as_ref().map_or(1, |fs| fs.samples);

    let mut ingest = TelemetryIngest::new(
        &base_topic,
        AlarmTracker::new(&cfg.alarms, sump_samples),
        Arc::clone(&shared),
        Arc::clone(&notifier),
    );

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    ingest.handle_message(&p.topic, &p.payload).await;
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(host = %cfg.mqtt.host, port = cfg.mqtt.port, "mqtt connected");
                    // Subscriptions do not survive a clean-session reconnect.
                    for sensor in &cfg.sensors {
                        let topic = sensor_topic(&base_topic, sensor);
                        match client.try_subscribe(&topic, QoS::AtLeastOnce) {
                            Ok(()) => debug!(%topic, "subscribed"),
                            Err(e) => error!(%topic, error = %e, "subscribe failed"),
                        }
                    }
                    let mut st = shared.write().await;
                    st.mqtt_connected = true;
                    st.record_system("mqtt connected".to_string());
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("mqtt disconnected");
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_system("mqtt disconnected".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "mqtt error, reconnecting");
                    {
                        let mut st = shared.write().await;
                        st.mqtt_connected = false;
                        st.record_error(format!("mqtt error: {e}"));
                    }
                    sleep(Duration::from_secs(2)).await;
                }
            },
            _ = switch_tick.tick(), if float_switch.is_some() => {
                if let Some(sw) = &float_switch {
                    ingest.handle_switch_sample(sw.read()).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    shared.write().await.record_system("hub stopping".to_string());
    // Receivers may already be gone; nothing to do then.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "background task failed");
        }
    }
    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "mqtt disconnect failed");
    }
    info!("hub stopped");
    Ok(())
}
