use std::{env, net::SocketAddr};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_addr: SocketAddr,
    pub camera_device: String,
    pub camera_input_format: String,
    pub still_size: (u32, u32),
    pub stream_size: (u32, u32),
    pub stills_dir: String,
    pub timelapse_dir: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_name = env::var("PICAM_APP_NAME").unwrap_or_else(|_| "PiCam".to_owned());
        let bind_addr = env::var("PICAM_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8888".to_owned())
            .parse()?;
        let camera_device =
            env::var("PICAM_CAMERA_DEVICE").unwrap_or_else(|_| "/dev/video0".to_owned());
        let camera_input_format =
            env::var("PICAM_CAMERA_INPUT_FORMAT").unwrap_or_else(|_| "mjpeg".to_owned());
        let still_size = parse_size(
            &env::var("PICAM_STILL_SIZE").unwrap_or_else(|_| "1920x1080".to_owned()),
        )?;
        let stream_size = parse_size(
            &env::var("PICAM_STREAM_SIZE").unwrap_or_else(|_| "640x480".to_owned()),
        )?;
        let stills_dir = env::var("PICAM_STILLS_DIR").unwrap_or_else(|_| "stills".to_owned());
        let timelapse_dir =
            env::var("PICAM_TIMELAPSE_DIR").unwrap_or_else(|_| "timelapse".to_owned());

        Ok(Self {
            app_name,
            bind_addr,
            camera_device,
            camera_input_format,
            still_size,
            stream_size,
            stills_dir,
            timelapse_dir,
        })
    }
}

fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("size must look like 1920x1080, got {value:?}"))?;
    let width = w.trim().parse::<u32>().context("width must be an integer")?;
    let height = h.trim().parse::<u32>().context("height must be an integer")?;
    if width == 0 || height == 0 {
        anyhow::bail!("size dimensions must be positive, got {value:?}");
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::{AppConfig, parse_size};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("failed to lock env mutex")
    }

    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = lock_env();
        for key in [
            "PICAM_APP_NAME",
            "PICAM_BIND_ADDR",
            "PICAM_CAMERA_DEVICE",
            "PICAM_STILL_SIZE",
            "PICAM_STREAM_SIZE",
        ] {
            remove_env(key);
        }

        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.still_size, (1920, 1080));
        assert_eq!(config.stream_size, (640, 480));
        assert_eq!(config.bind_addr.port(), 8888);
    }

    #[test]
    fn from_env_reads_overrides() {
        let _guard = lock_env();
        set_env("PICAM_CAMERA_DEVICE", "/dev/video2");
        set_env("PICAM_STILL_SIZE", "1280x720");

        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.still_size, (1280, 720));

        remove_env("PICAM_CAMERA_DEVICE");
        remove_env("PICAM_STILL_SIZE");
    }

    #[test]
    fn rejects_malformed_sizes() {
        assert!(parse_size("1920x1080").is_ok());
        assert!(parse_size("1920").is_err());
        assert!(parse_size("0x1080").is_err());
        assert!(parse_size("widexhigh").is_err());
    }
}
