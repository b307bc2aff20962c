//! Capture binary: opens the first capture device and reports frame timing.

use std::time::Instant;

use ivi_cam_capture::{CameraDevice, CaptureConfig, CaptureStream, V4l2Device};
use tracing::{error, info};

fn main() {
    tracing_subscriber::fmt().init();

    if let Err(err) = run() {
        error!(%err, fatal = err.is_fatal(), "capture failed");
        std::process::exit(1);
    }
}

fn run() -> ivi_cam_capture::Result<()> {
    let config = CaptureConfig::default();

    let mut device = V4l2Device::open(0)?;
    let format = device.negotiate(&config)?;
    if let Some(caps) = device.capabilities() {
        info!(card = %caps.card, driver = %caps.driver, "opened capture device");
    }
    info!(
        width = format.width,
        height = format.height,
        "negotiated capture format"
    );

    let mut stream = device.start_stream()?;
    info!(buffers = stream.buffer_count(), "streaming started");

    let started = Instant::now();
    let mut frames = 0u32;
    loop {
        let frame = stream.acquire(config.timeout)?;
        frames += 1;
        if frames % 60 == 0 {
            let fps = f64::from(frames) / started.elapsed().as_secs_f64();
            info!(sequence = frame.sequence, fps, "capturing");
        }
    }
}
