//! MQTT backend.
//!
//! Publishes a metadata-only JSON task per motion event; a downstream
//! consumer fetches or receives the pixels by other means. Image bytes
//! never cross the broker.

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use serde::Serialize;

use crate::config::MqttSettings;
use crate::storage::{Backend, UploadShot};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const CHANNEL_CAPACITY: usize = 10;

/// Payload published for each motion event.
#[derive(Serialize)]
struct MotionTask<'a> {
    camera_id: &'a str,
    captured_at: String,
    stamp: u64,
    object_key: String,
    regions: Vec<[u32; 5]>,
}

struct MqttRuntime {
    client: Client,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttRuntime {
    fn new(client: Client, mut connection: Connection) -> Self {
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });
        Self {
            client,
            connection_handle: Some(handle),
        }
    }

    fn disconnect(mut self) {
        let _ = self.client.disconnect();
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct MqttBackend {
    host: String,
    port: u16,
    topic: String,
    client_id: String,
    runtime: Option<MqttRuntime>,
}

impl MqttBackend {
    pub fn new(settings: &MqttSettings, camera_id: &str) -> Self {
        let client_id = format!("sentrycam-{}", camera_id.replace('/', "-"));
        Self {
            host: settings.host.clone(),
            port: settings.port,
            topic: settings.topic.clone(),
            client_id,
            runtime: None,
        }
    }

    fn connect(&self) -> MqttRuntime {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, connection) = Client::new(options, CHANNEL_CAPACITY);
        MqttRuntime::new(client, connection)
    }
}

impl Drop for MqttBackend {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.disconnect();
        }
    }
}

impl Backend for MqttBackend {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn check(&self) -> bool {
        match resolve_first(&self.host, self.port) {
            Some(addr) => {
                std::net::TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok()
            }
            None => false,
        }
    }

    fn configure(&mut self) -> Result<()> {
        if self.runtime.is_none() {
            self.runtime = Some(self.connect());
        }
        Ok(())
    }

    fn upload(&mut self, shot: &UploadShot) -> Result<()> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| anyhow!("MQTT backend is not configured"))?;
        let task = MotionTask {
            camera_id: &shot.camera_id,
            captured_at: shot.captured_at.to_rfc3339(),
            stamp: shot.stamp.0,
            object_key: shot.object_key(),
            regions: shot
                .regions
                .iter()
                .map(|r| [r.rect.x, r.rect.y, r.rect.w, r.rect.h, r.size])
                .collect(),
        };
        let payload = serde_json::to_vec(&task)?;
        let topic = format!("{}/motion", self.topic);
        runtime
            .client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", topic, e))?;
        debug!("published motion task for {}", task.object_key);
        Ok(())
    }
}

fn resolve_first(host: &str, port: u16) -> Option<std::net::SocketAddr> {
    use std::net::ToSocketAddrs;
    (host, port).to_socket_addrs().ok()?.next()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CaptureStamp;
    use crate::motion::{MotionRegion, Rect};
    use chrono::{TimeZone, Utc};

    fn settings() -> MqttSettings {
        MqttSettings {
            enabled: true,
            num_workers: 1,
            host: "broker.example".to_string(),
            port: 1883,
            topic: "sentrycam".to_string(),
        }
    }

    #[test]
    fn client_id_is_derived_from_camera_id() {
        let backend = MqttBackend::new(&settings(), "yard/cam1");
        assert_eq!(backend.client_id, "sentrycam-yard-cam1");
    }

    #[test]
    fn upload_before_configure_fails() {
        let mut backend = MqttBackend::new(&settings(), "yard/cam1");
        let shot = UploadShot {
            camera_id: "yard/cam1".to_string(),
            captured_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap(),
            stamp: CaptureStamp(1),
            jpeg: Vec::new(),
            boxed_jpeg: Vec::new(),
            regions: vec![MotionRegion {
                rect: Rect::new(1, 2, 3, 4),
                size: 9,
            }],
        };
        assert!(backend.upload(&shot).is_err());
    }

    #[test]
    fn task_payload_shape() {
        let task = MotionTask {
            camera_id: "yard/cam1",
            captured_at: "2024-03-09T14:30:05+00:00".to_string(),
            stamp: 7,
            object_key: "yard/cam1/20240309/143005.000.jpg".to_string(),
            regions: vec![[1, 2, 3, 4, 9]],
        };
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["stamp"], 7);
        assert_eq!(json["regions"][0][4], 9);
    }
}
