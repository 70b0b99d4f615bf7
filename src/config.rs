use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{CameraIdentity, SessionPolicy};
use crate::detect::filter::{DEFAULT_MAX_RESULTS, DEFAULT_MIN_AREA};
use crate::detect::FilterSettings;
use crate::geometry::NormRect;
use crate::ingest::CaptureHints;
use crate::pipeline::PipelineSettings;
use crate::publish::{MqttSettings, PublisherSettings};
use crate::zone::{validate_zone_id, ZoneClassifier, ZoneRectangle};

pub const CONFIG_ENV: &str = "BLINDSPOT_CONFIG";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_FPS: u32 = 15;
const DEFAULT_TARGET_FPS: f64 = 15.0;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.5;
const DEFAULT_SCALE_X: f32 = 1.5;
const DEFAULT_SCALE_Y: f32 = 1.0;
const DEFAULT_Z: f32 = 0.0;
const DEFAULT_STUB_CLASS: u32 = 2;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_STATUS_LOG_SECS: u64 = 5;

struct DefaultCamera {
    zone: &'static str,
    device: &'static str,
    name: &'static str,
    description: &'static str,
    rect: (f32, f32, f32, f32),
    z_offset: f32,
}

const DEFAULT_CAMERAS: [DefaultCamera; 3] = [
    DefaultCamera {
        zone: "left",
        device: "stub://left",
        name: "Left Side Camera",
        description: "Monitors left blind spot",
        rect: (0.0, 0.3, 0.2, 0.8),
        z_offset: 4.0,
    },
    DefaultCamera {
        zone: "right",
        device: "stub://right",
        name: "Right Side Camera",
        description: "Monitors right blind spot",
        rect: (0.7, 1.0, 0.2, 0.8),
        z_offset: -5.0,
    },
    DefaultCamera {
        zone: "rear",
        device: "stub://rear",
        name: "Rear Camera",
        description: "Monitors rear blind spot",
        rect: (0.3, 0.7, 0.7, 1.0),
        z_offset: 0.0,
    },
];

fn default_classes() -> BTreeMap<u32, String> {
    [(0, "person"), (2, "car"), (3, "motorcycle")]
        .into_iter()
        .map(|(id, label)| (id, label.to_string()))
        .collect()
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BlindspotConfigFile {
    capture: Option<CaptureConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
    detection: Option<DetectionConfigFile>,
    position: Option<PositionConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    session: Option<SessionConfigFile>,
    publisher: Option<PublisherConfigFile>,
    mqtt: Option<MqttConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    zone: String,
    device: Option<String>,
    name: Option<String>,
    description: Option<String>,
    rect: Option<NormRect>,
    z_offset: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    detector: Option<String>,
    model_path: Option<PathBuf>,
    model_input_width: Option<u32>,
    model_input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_results_per_frame: Option<usize>,
    min_area: Option<f32>,
    /// Class id (as a string key) to label.
    classes: Option<BTreeMap<String, String>>,
    stub_class_id: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PositionConfigFile {
    scale_x: Option<f32>,
    scale_y: Option<f32>,
    default_z: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    target_fps: Option<f64>,
    max_cycles: Option<u64>,
    status_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    read_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    failure_threshold: Option<u32>,
    reconnect_interval_cycles: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PublisherConfigFile {
    sink: Option<SinkKind>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    addr: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    allow_remote: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
    keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    kind: Option<AlertKind>,
    command: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Mqtt,
    Log,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    #[default]
    Log,
    Bell,
    Command,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    pub identity: CameraIdentity,
    pub rect: NormRect,
    pub z_offset: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    /// Registered backend name; None selects the registry default.
    pub detector: Option<String>,
    pub model_path: Option<PathBuf>,
    pub model_input_width: u32,
    pub model_input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_results_per_frame: usize,
    pub min_area: f32,
    pub classes: BTreeMap<u32, String>,
    pub stub_class_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSettings {
    pub scale_x: f32,
    pub scale_y: f32,
    pub default_z: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    pub kind: AlertKind,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlindspotConfig {
    pub capture: CaptureHints,
    pub cameras: Vec<CameraConfig>,
    pub detection: DetectionSettings,
    pub position: PositionSettings,
    pub pipeline: PipelineSettings,
    pub session: SessionPolicy,
    pub sink: SinkKind,
    pub publisher: PublisherSettings,
    pub mqtt: MqttSettings,
    pub alert: AlertSettings,
}

impl BlindspotConfig {
    /// Load from `path` (or `$BLINDSPOT_CONFIG`), apply environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => BlindspotConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BlindspotConfigFile) -> Result<Self> {
        let capture = file.capture.unwrap_or_default();
        let capture = CaptureHints {
            width: capture.width.unwrap_or(DEFAULT_WIDTH),
            height: capture.height.unwrap_or(DEFAULT_HEIGHT),
            fps: capture.fps.unwrap_or(DEFAULT_CAPTURE_FPS),
        };

        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .map(camera_from_file)
                .collect::<Result<Vec<_>>>()?,
            None => DEFAULT_CAMERAS.iter().map(camera_from_default).collect(),
        };

        let detection_file = file.detection.unwrap_or_default();
        let classes = match detection_file.classes {
            Some(raw) => parse_classes(raw)?,
            None => default_classes(),
        };
        let detection = DetectionSettings {
            detector: detection_file.detector,
            model_path: detection_file.model_path,
            model_input_width: detection_file
                .model_input_width
                .unwrap_or(DEFAULT_MODEL_INPUT),
            model_input_height: detection_file
                .model_input_height
                .unwrap_or(DEFAULT_MODEL_INPUT),
            confidence_threshold: detection_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE),
            iou_threshold: detection_file.iou_threshold.unwrap_or(DEFAULT_IOU),
            max_results_per_frame: detection_file
                .max_results_per_frame
                .unwrap_or(DEFAULT_MAX_RESULTS),
            min_area: detection_file.min_area.unwrap_or(DEFAULT_MIN_AREA),
            classes,
            stub_class_id: detection_file.stub_class_id.unwrap_or(DEFAULT_STUB_CLASS),
        };

        let position = file.position.unwrap_or_default();
        let position = PositionSettings {
            scale_x: position.scale_x.unwrap_or(DEFAULT_SCALE_X),
            scale_y: position.scale_y.unwrap_or(DEFAULT_SCALE_Y),
            default_z: position.default_z.unwrap_or(DEFAULT_Z),
        };

        let pipeline = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            target_fps: pipeline.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            max_cycles: pipeline.max_cycles,
            status_log_interval: Duration::from_secs(
                pipeline.status_log_secs.unwrap_or(DEFAULT_STATUS_LOG_SECS),
            ),
        };

        let session_file = file.session.unwrap_or_default();
        let defaults = SessionPolicy::default();
        let session = SessionPolicy {
            read_attempts: session_file.read_attempts.unwrap_or(defaults.read_attempts),
            retry_delay: session_file
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            failure_threshold: session_file
                .failure_threshold
                .unwrap_or(defaults.failure_threshold),
            reconnect_interval_cycles: session_file
                .reconnect_interval_cycles
                .unwrap_or(defaults.reconnect_interval_cycles),
        };

        let publisher_file = file.publisher.unwrap_or_default();
        let sink = publisher_file.sink.unwrap_or_default();
        let publisher = PublisherSettings {
            max_attempts: publisher_file
                .max_attempts
                .unwrap_or(PublisherSettings::default().max_attempts),
        };

        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt_defaults = MqttSettings::default();
        let mqtt = MqttSettings {
            addr: mqtt_file.addr.unwrap_or(mqtt_defaults.addr),
            topic_prefix: mqtt_file.topic_prefix.unwrap_or(mqtt_defaults.topic_prefix),
            client_id: mqtt_file.client_id.unwrap_or(mqtt_defaults.client_id),
            username: mqtt_file.username,
            password: mqtt_file.password,
            use_tls: mqtt_file.use_tls.unwrap_or(mqtt_defaults.use_tls),
            allow_remote: mqtt_file.allow_remote.unwrap_or(mqtt_defaults.allow_remote),
            tls_ca_path: mqtt_file.tls_ca_path,
            tls_client_cert_path: mqtt_file.tls_client_cert_path,
            tls_client_key_path: mqtt_file.tls_client_key_path,
            keep_alive: mqtt_file
                .keep_alive_secs
                .map(Duration::from_secs)
                .unwrap_or(mqtt_defaults.keep_alive),
        };

        let alert = file.alert.unwrap_or_default();
        let alert = AlertSettings {
            kind: alert.kind.unwrap_or_default(),
            command: alert.command.unwrap_or_default(),
        };

        Ok(Self {
            capture,
            cameras,
            detection,
            position,
            pipeline,
            session,
            sink,
            publisher,
            mqtt,
            alert,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_non_empty("BLINDSPOT_MQTT_ADDR") {
            self.mqtt.addr = addr;
        }
        if let Some(prefix) = env_non_empty("BLINDSPOT_MQTT_TOPIC_PREFIX") {
            self.mqtt.topic_prefix = prefix;
        }
        if let Some(fps) = env_non_empty("BLINDSPOT_TARGET_FPS") {
            self.pipeline.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("BLINDSPOT_TARGET_FPS must be a number"))?;
        }
        if let Some(conf) = env_non_empty("BLINDSPOT_CONFIDENCE") {
            self.detection.confidence_threshold = conf
                .parse()
                .map_err(|_| anyhow!("BLINDSPOT_CONFIDENCE must be a number"))?;
        }
        if let Some(max) = env_non_empty("BLINDSPOT_MAX_RESULTS") {
            self.detection.max_results_per_frame = max
                .parse()
                .map_err(|_| anyhow!("BLINDSPOT_MAX_RESULTS must be a positive integer"))?;
        }
        if let Some(detector) = env_non_empty("BLINDSPOT_DETECTOR") {
            self.detection.detector = Some(detector);
        }
        if let Some(path) = env_non_empty("BLINDSPOT_MODEL_PATH") {
            self.detection.model_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            let zone = camera.identity.zone.as_str();
            validate_zone_id(zone)?;
            if !seen.insert(zone) {
                return Err(anyhow!("duplicate camera zone '{}'", zone));
            }
            if camera.identity.device_id.trim().is_empty() {
                return Err(anyhow!("camera '{}' has an empty device id", zone));
            }
            camera
                .rect
                .validate()
                .with_context(|| format!("camera '{}'", zone))?;
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be positive"));
        }
        let detection = &self.detection;
        if !(0.0..=1.0).contains(&detection.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&detection.iou_threshold) {
            return Err(anyhow!("iou_threshold must be within [0, 1]"));
        }
        if detection.max_results_per_frame == 0 {
            return Err(anyhow!("max_results_per_frame must be at least 1"));
        }
        if !detection.min_area.is_finite() || detection.min_area < 0.0 {
            return Err(anyhow!("min_area must be a non-negative number"));
        }
        if detection.classes.is_empty() {
            return Err(anyhow!("at least one detection class must be configured"));
        }
        if detection.model_input_width == 0 || detection.model_input_height == 0 {
            return Err(anyhow!("model input size must be positive"));
        }

        if !self.pipeline.target_fps.is_finite() || self.pipeline.target_fps <= 0.0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.session.read_attempts == 0 || self.session.failure_threshold == 0 {
            return Err(anyhow!(
                "session read_attempts and failure_threshold must be at least 1"
            ));
        }
        if self.session.reconnect_interval_cycles == 0 {
            return Err(anyhow!("session reconnect_interval_cycles must be at least 1"));
        }
        if self.publisher.max_attempts == 0 {
            return Err(anyhow!("publisher max_attempts must be at least 1"));
        }
        if self.mqtt.topic_prefix.trim().is_empty() {
            return Err(anyhow!("mqtt topic_prefix must not be empty"));
        }
        if self.alert.kind == AlertKind::Command && self.alert.command.is_empty() {
            return Err(anyhow!("alert kind 'command' requires alert.command"));
        }
        Ok(())
    }

    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            confidence_threshold: self.detection.confidence_threshold,
            allowed_classes: self.detection.classes.keys().copied().collect(),
            iou_threshold: self.detection.iou_threshold,
            max_results: self.detection.max_results_per_frame,
            min_area: self.detection.min_area,
        }
    }

    pub fn zone_classifier(&self) -> ZoneClassifier {
        let zones = self.cameras.iter().map(|camera| ZoneRectangle {
            zone: camera.identity.zone.clone(),
            rect: camera.rect,
            z_offset: camera.z_offset,
        });
        ZoneClassifier::new(
            zones,
            self.detection.classes.clone(),
            self.position.scale_x,
            self.position.scale_y,
            self.position.default_z,
        )
    }
}

fn camera_from_default(default: &DefaultCamera) -> CameraConfig {
    let (x_min, x_max, y_min, y_max) = default.rect;
    CameraConfig {
        identity: CameraIdentity {
            zone: default.zone.to_string(),
            device_id: default.device.to_string(),
            name: default.name.to_string(),
            description: default.description.to_string(),
        },
        rect: NormRect::new(x_min, x_max, y_min, y_max),
        z_offset: default.z_offset,
    }
}

/// Cameras named after a built-in zone inherit its geometry; others must
/// supply a rectangle.
fn camera_from_file(file: CameraConfigFile) -> Result<CameraConfig> {
    let zone = file.zone.trim().to_lowercase();
    let builtin = DEFAULT_CAMERAS
        .iter()
        .find(|d| d.zone == zone)
        .map(camera_from_default);
    let rect = file
        .rect
        .or(builtin.as_ref().map(|b| b.rect))
        .ok_or_else(|| anyhow!("camera '{}' requires a rect", zone))?;
    let device_id = file
        .device
        .or(builtin.as_ref().map(|b| b.identity.device_id.clone()))
        .ok_or_else(|| anyhow!("camera '{}' requires a device", zone))?;
    let name = file
        .name
        .or(builtin.as_ref().map(|b| b.identity.name.clone()))
        .unwrap_or_else(|| zone.clone());
    let description = file
        .description
        .or(builtin.as_ref().map(|b| b.identity.description.clone()))
        .unwrap_or_default();
    let z_offset = file
        .z_offset
        .or(builtin.as_ref().map(|b| b.z_offset))
        .unwrap_or(DEFAULT_Z);

    Ok(CameraConfig {
        identity: CameraIdentity {
            zone,
            device_id,
            name,
            description,
        },
        rect,
        z_offset,
    })
}

fn parse_classes(raw: BTreeMap<String, String>) -> Result<BTreeMap<u32, String>> {
    raw.into_iter()
        .map(|(id, label)| {
            let id: u32 = id
                .trim()
                .parse()
                .map_err(|_| anyhow!("class id '{}' must be a non-negative integer", id))?;
            Ok((id, label))
        })
        .collect()
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<BlindspotConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> BlindspotConfig {
        BlindspotConfig::from_file(BlindspotConfigFile::default()).unwrap()
    }

    #[test]
    fn defaults_mirror_reference_layout() {
        let cfg = defaults();
        assert_eq!(cfg.capture, CaptureHints::default());
        assert_eq!(cfg.cameras.len(), 3);
        assert_eq!(cfg.cameras[1].identity.zone, "right");
        assert_eq!(cfg.cameras[1].z_offset, -5.0);
        assert_eq!(cfg.cameras[2].rect, NormRect::new(0.3, 0.7, 0.7, 1.0));
        assert_eq!(cfg.detection.max_results_per_frame, 1);
        assert_eq!(cfg.detection.classes.get(&3).map(String::as_str), Some("motorcycle"));
        assert_eq!(cfg.sink, SinkKind::Mqtt);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builtin_zone_inherits_geometry() {
        let camera = camera_from_file(CameraConfigFile {
            zone: "Left".to_string(),
            device: Some("/dev/video2".to_string()),
            name: None,
            description: None,
            rect: None,
            z_offset: None,
        })
        .unwrap();
        assert_eq!(camera.identity.zone, "left");
        assert_eq!(camera.identity.device_id, "/dev/video2");
        assert_eq!(camera.identity.name, "Left Side Camera");
        assert_eq!(camera.rect, NormRect::new(0.0, 0.3, 0.2, 0.8));
        assert_eq!(camera.z_offset, 4.0);
    }

    #[test]
    fn custom_zone_requires_rect_and_device() {
        let missing_rect = CameraConfigFile {
            zone: "roof".to_string(),
            device: Some("stub://roof".to_string()),
            name: None,
            description: None,
            rect: None,
            z_offset: None,
        };
        assert!(camera_from_file(missing_rect).is_err());
    }

    #[test]
    fn class_keys_must_be_numeric() {
        let raw = [("car".to_string(), "car".to_string())].into_iter().collect();
        assert!(parse_classes(raw).is_err());
        let raw = [("2".to_string(), "car".to_string())].into_iter().collect();
        assert_eq!(parse_classes(raw).unwrap().get(&2).unwrap(), "car");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = defaults();
        cfg.detection.max_results_per_frame = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.pipeline.target_fps = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.cameras[1].identity.zone = "left".to_string();
        assert!(cfg.validate().unwrap_err().to_string().contains("duplicate"));

        let mut cfg = defaults();
        cfg.alert.kind = AlertKind::Command;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn derived_settings_follow_config() {
        let cfg = defaults();
        let filter = cfg.filter_settings();
        assert_eq!(filter.allowed_classes.len(), 3);
        assert!(filter.allowed_classes.contains(&2));
        let classifier = cfg.zone_classifier();
        assert_eq!(classifier.z_offset("left"), 4.0);
        assert_eq!(classifier.z_offset("roof"), 0.0);
    }
}
