use crate::{
    camera::{ffmpeg::FfmpegAdapter, session::SessionManager},
    config::AppConfig,
};

pub struct AppState {
    pub config: AppConfig,
    pub session: SessionManager<FfmpegAdapter>,
}

impl AppState {
    pub fn new(config: AppConfig, session: SessionManager<FfmpegAdapter>) -> Self {
        Self { config, session }
    }
}
