//! Capture device lifecycle and format negotiation over raw V4L2 ioctls.

use std::fs;
use std::io;
use std::mem;
use std::os::raw::c_void;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use v4l::v4l2;
use v4l::v4l_sys::*;

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::ioctl::xioctl;
use crate::pool::BufferPool;
use crate::stream::V4l2Stream;
use crate::traits::{CameraDevice, CaptureFormat, DeviceCapabilities, FourCC};

/// Sentinel for "descriptor not open".
const FD_NONE: RawFd = -1;

/// A V4L2 capture device session.
///
/// Owns the device descriptor and the negotiated capture contract. Buffer
/// memory and streaming state live in the [`V4l2Stream`] created by
/// [`CameraDevice::start_stream`]. The descriptor is released on
/// [`V4l2Device::close`] or, as a fallback, on drop.
pub struct V4l2Device {
    path: PathBuf,
    fd: RawFd,
    capabilities: Option<DeviceCapabilities>,
    format: Option<CaptureFormat>,
    config: Option<CaptureConfig>,
}

impl V4l2Device {
    /// Open capture device N, resolving the index to `/dev/videoN`.
    pub fn open(index: u32) -> Result<Self> {
        Self::open_path(format!("/dev/video{index}"))
    }

    /// Open a capture device by explicit path.
    pub fn open_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CaptureError::NotFound(path));
            }
            Err(source) => return Err(CaptureError::OpenError { path, source }),
        };
        if !meta.file_type().is_char_device() {
            return Err(CaptureError::NotACaptureDevice(path));
        }

        let fd = match v4l2::open(&path, libc::O_RDWR | libc::O_NONBLOCK) {
            Ok(fd) => fd,
            Err(source) => return Err(CaptureError::OpenError { path, source }),
        };
        debug!(path = %path.display(), fd, "opened capture device");

        Ok(Self {
            path,
            fd,
            capabilities: None,
            format: None,
            config: None,
        })
    }

    /// Release the device descriptor.
    ///
    /// Calling this on an already-closed session is a no-op. The
    /// descriptor is reset to the sentinel even when the underlying close
    /// fails, so the session never retains a stale handle.
    pub fn close(&mut self) -> Result<()> {
        if self.fd == FD_NONE {
            return Ok(());
        }
        let res = v4l2::close(self.fd);
        self.fd = FD_NONE;
        self.capabilities = None;
        self.format = None;
        self.config = None;
        res.map_err(CaptureError::CloseError)
    }

    /// Path of the underlying device node.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The format the driver settled on, if negotiated.
    #[must_use]
    pub const fn format(&self) -> Option<CaptureFormat> {
        self.format
    }

    pub(crate) const fn fd(&self) -> RawFd {
        self.fd
    }

    fn query_capabilities(&self) -> Result<DeviceCapabilities> {
        let mut caps = unsafe { mem::zeroed::<v4l2_capability>() };
        unsafe {
            xioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYCAP,
                std::ptr::addr_of_mut!(caps).cast::<c_void>(),
            )
        }
        .map_err(|err| {
            if err.raw_os_error() == Some(libc::EINVAL) {
                CaptureError::UnsupportedDevice(format!(
                    "{} does not answer capability queries",
                    self.path.display()
                ))
            } else {
                CaptureError::UnsupportedDevice(format!(
                    "capability query on {} failed: {err}",
                    self.path.display()
                ))
            }
        })?;

        Ok(DeviceCapabilities {
            driver: fixed_string(&caps.driver),
            card: fixed_string(&caps.card),
            bus_info: fixed_string(&caps.bus_info),
            can_capture: caps.capabilities & V4L2_CAP_VIDEO_CAPTURE != 0,
            can_stream: caps.capabilities & V4L2_CAP_STREAMING != 0,
        })
    }

    /// Best-effort crop selection. Many devices lack cropping entirely, so
    /// failures here are logged and ignored.
    fn apply_crop(&self, config: &CaptureConfig) {
        unsafe {
            let mut cropcap = v4l2_cropcap {
                type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
                ..mem::zeroed()
            };
            if let Err(err) = xioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_CROPCAP,
                std::ptr::addr_of_mut!(cropcap).cast::<c_void>(),
            ) {
                debug!(%err, "device reports no crop capability");
                return;
            }

            let mut crop = v4l2_crop {
                type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
                c: cropcap.defrect,
            };
            if let Some(rect) = config.crop {
                crop.c.left = rect.left;
                crop.c.top = rect.top;
                crop.c.width = rect.width;
                crop.c.height = rect.height;
            }
            if let Err(err) = xioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_CROP,
                std::ptr::addr_of_mut!(crop).cast::<c_void>(),
            ) {
                debug!(%err, "crop selection rejected");
            }
        }
    }

    /// Request a fixed frame interval of `1/fps`. Unlike crop, the caller
    /// asked for this explicitly, so the driver must honor it.
    fn apply_frame_interval(&self, fps: u32) -> Result<()> {
        unsafe {
            let mut parm = v4l2_streamparm {
                type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
                ..mem::zeroed()
            };
            xioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_G_PARM,
                std::ptr::addr_of_mut!(parm).cast::<c_void>(),
            )
            .map_err(CaptureError::FrameRateNegotiationFailed)?;

            parm.parm.capture.timeperframe = v4l2_fract {
                numerator: 1,
                denominator: fps,
            };
            xioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_PARM,
                std::ptr::addr_of_mut!(parm).cast::<c_void>(),
            )
            .map_err(CaptureError::FrameRateNegotiationFailed)?;
        }
        debug!(fps, "fixed frame interval accepted");
        Ok(())
    }

    fn apply_format(&self, config: &CaptureConfig) -> Result<CaptureFormat> {
        unsafe {
            let mut fmt = v4l2_format {
                type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
                ..mem::zeroed()
            };
            fmt.fmt.pix.width = config.width;
            fmt.fmt.pix.height = config.height;
            fmt.fmt.pix.pixelformat = FourCC::XBGR32.code();
            fmt.fmt.pix.field = v4l2_field_V4L2_FIELD_NONE;

            xioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_FMT,
                std::ptr::addr_of_mut!(fmt).cast::<c_void>(),
            )
            .map_err(CaptureError::FormatNegotiationFailed)?;

            let pix = fmt.fmt.pix;
            if pix.pixelformat != FourCC::XBGR32.code() {
                // The driver substituted another layout; the rest of the
                // pipeline cannot consume it.
                return Err(CaptureError::FormatNegotiationFailed(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "driver substituted a different pixel format",
                )));
            }
            debug!(
                width = pix.width,
                height = pix.height,
                stride = pix.bytesperline,
                "driver accepted capture format"
            );
            Ok(CaptureFormat {
                width: pix.width,
                height: pix.height,
                fourcc: FourCC::XBGR32,
                stride: pix.bytesperline,
                size: pix.sizeimage,
            })
        }
    }
}

impl CameraDevice for V4l2Device {
    type Stream<'a> = V4l2Stream<'a>;

    fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.as_ref()
    }

    fn negotiate(&mut self, config: &CaptureConfig) -> Result<CaptureFormat> {
        let caps = self.query_capabilities()?;
        if !caps.can_capture {
            return Err(CaptureError::UnsupportedDevice(format!(
                "{} has no video capture capability",
                self.path.display()
            )));
        }

        self.apply_crop(config);
        if let Some(fps) = config.frame_rate {
            self.apply_frame_interval(fps)?;
        }
        let format = self.apply_format(config)?;

        self.capabilities = Some(caps);
        self.format = Some(format);
        self.config = Some(config.clone());
        Ok(format)
    }

    fn start_stream(&mut self) -> Result<Self::Stream<'_>> {
        let format = self.format.ok_or(CaptureError::NotNegotiated)?;
        let config = self.config.clone().ok_or(CaptureError::NotNegotiated)?;
        let pool = BufferPool::allocate(self.fd, &config, format)?;
        V4l2Stream::start(self, pool, format)
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        if self.fd != FD_NONE {
            if let Err(err) = self.close() {
                warn!(path = %self.path.display(), %err, "failed to close capture device");
            }
        }
    }
}

/// Decode a NUL-padded fixed-size identity field.
fn fixed_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(raw.get(..end).unwrap_or(raw)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fd_count() -> usize {
        fs::read_dir("/proc/self/fd").map_or(0, Iterator::count)
    }

    #[test]
    fn test_open_missing_path_reports_not_found() {
        let before = fd_count();
        for _ in 0..3 {
            let err = V4l2Device::open_path("/this/path/does/not/exist")
                .err()
                .expect("open should fail");
            assert!(matches!(err, CaptureError::NotFound(_)));
            assert!(!err.is_fatal());
        }
        assert_eq!(fd_count(), before, "failed opens must not leak descriptors");
    }

    #[test]
    fn test_open_missing_index_reports_not_found() {
        // Device index far beyond anything a test host registers.
        let err = V4l2Device::open(4095).err().expect("open should fail");
        assert!(matches!(err, CaptureError::NotFound(_)), "{err}");
        if let CaptureError::NotFound(path) = err {
            assert_eq!(path, PathBuf::from("/dev/video4095"));
        }
    }

    #[test]
    fn test_open_regular_file_is_not_a_capture_device() {
        let path = std::env::temp_dir().join(format!("ivi-cam-capture-{}", std::process::id()));
        fs::write(&path, b"not a device").expect("write temp file");

        let before = fd_count();
        let err = V4l2Device::open_path(&path).err().expect("open should fail");
        assert!(matches!(err, CaptureError::NotACaptureDevice(_)));
        assert!(!err.is_fatal());
        assert_eq!(fd_count(), before);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_close_on_closed_session_is_a_no_op() {
        let mut device = V4l2Device {
            path: PathBuf::from("/dev/video0"),
            fd: FD_NONE,
            capabilities: None,
            format: None,
            config: None,
        };
        assert!(device.close().is_ok());
        assert!(device.close().is_ok());
    }

    #[test]
    fn test_fixed_string_stops_at_nul() {
        assert_eq!(fixed_string(b"vivid\0\0\0"), "vivid");
        assert_eq!(fixed_string(b"full"), "full");
        assert_eq!(fixed_string(b"\0"), "");
    }
}
