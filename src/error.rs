//! Pipeline error taxonomy.
//!
//! Every failure the overlay pipeline can surface to a user maps to exactly one
//! `PipelineError` variant. Camera and model failures are fatal to the session;
//! detection failures are recovered inside the render loop and only appear here
//! so they can be logged uniformly.

use std::io;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("camera device not found: {0}")]
    DeviceNotFound(String),

    #[error("camera acquisition failed: {0}")]
    OtherAcquisitionFailure(String),

    #[error("model load failed: {0}")]
    ModelLoadFailure(String),

    #[error("detection failed: {0}")]
    DetectionFailure(String),

    #[error("frame capture failed: {0}")]
    FrameCaptureFailure(String),
}

impl PipelineError {
    /// Stable machine-readable code, suitable for logs and status payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "camera.permission_denied",
            Self::DeviceNotFound(_) => "camera.device_not_found",
            Self::OtherAcquisitionFailure(_) => "camera.acquisition_failed",
            Self::ModelLoadFailure(_) => "model.load_failed",
            Self::DetectionFailure(_) => "detect.frame_failed",
            Self::FrameCaptureFailure(_) => "capture.failed",
        }
    }

    /// Fatal errors halt the session and need explicit user action.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::DetectionFailure(_) | Self::FrameCaptureFailure(_)
        )
    }

    /// True for the camera errors that offer a camera-only retry.
    pub fn is_camera_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::DeviceNotFound(_) | Self::OtherAcquisitionFailure(_)
        )
    }

    /// Human-readable message shown in place of the video.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => {
                "Camera permission denied. Allow camera access for this app and press retry."
            }
            Self::DeviceNotFound(_) => {
                "No camera was found. Connect a camera and press retry."
            }
            Self::OtherAcquisitionFailure(_) => {
                "The camera could not be started. It may be in use by another application; press retry."
            }
            Self::ModelLoadFailure(_) => {
                "The object detection model failed to load. Close AR mode and try again later."
            }
            Self::DetectionFailure(_) => "Object detection failed for a frame.",
            Self::FrameCaptureFailure(_) => "Could not capture the current frame.",
        }
    }

    /// Classify an OS-level device error into the camera taxonomy.
    pub fn from_device_io(device: &str, err: &io::Error) -> Self {
        let detail = format!("{device}: {err}");
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(detail),
            io::ErrorKind::NotFound => Self::DeviceNotFound(detail),
            _ => Self::OtherAcquisitionFailure(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_have_distinct_messages() {
        let fatal = [
            PipelineError::PermissionDenied(String::new()),
            PipelineError::DeviceNotFound(String::new()),
            PipelineError::OtherAcquisitionFailure(String::new()),
            PipelineError::ModelLoadFailure(String::new()),
        ];
        for (i, a) in fatal.iter().enumerate() {
            assert!(a.is_fatal());
            for b in fatal.iter().skip(i + 1) {
                assert_ne!(a.user_message(), b.user_message());
                assert_ne!(a.code(), b.code());
            }
        }
        assert!(fatal[0]
            .user_message()
            .starts_with("Camera permission denied"));
    }

    #[test]
    fn detection_and_capture_failures_are_recoverable() {
        assert!(!PipelineError::DetectionFailure("x".into()).is_fatal());
        assert!(!PipelineError::FrameCaptureFailure("x".into()).is_fatal());
        assert!(!PipelineError::ModelLoadFailure("x".into()).is_camera_error());
    }

    #[test]
    fn io_errors_are_classified() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "EACCES");
        let missing = io::Error::new(io::ErrorKind::NotFound, "ENOENT");
        let busy = io::Error::new(io::ErrorKind::Other, "EBUSY");

        assert!(matches!(
            PipelineError::from_device_io("/dev/video0", &denied),
            PipelineError::PermissionDenied(_)
        ));
        assert!(matches!(
            PipelineError::from_device_io("/dev/video0", &missing),
            PipelineError::DeviceNotFound(_)
        ));
        assert!(matches!(
            PipelineError::from_device_io("/dev/video0", &busy),
            PipelineError::OtherAcquisitionFailure(_)
        ));
    }
}
