//! The device platform the controller opens sessions on.

#[cfg(feature = "usb")]
use std::sync::Arc;

use audio_bridge_core::models::config::{
    BridgeConfig, CaptureBackend, DeliveryModel, CAPTURE_DEVICE_PATTERN,
};
use audio_bridge_core::models::error::BridgeError;
use audio_bridge_core::traits::audio_platform::AudioPlatform;
use audio_bridge_core::traits::capture_source::CaptureSource;
use audio_bridge_core::traits::playback_sink::PlaybackSink;

use crate::cpal_capture::{PolledCapture, StreamCapture};
use crate::cpal_output::CpalPlaybackSink;
use crate::device_enumerator::DeviceEnumerator;
#[cfg(feature = "usb")]
use crate::usb_iso::{IsochronousCapture, SharedUsbHandle};

/// Opens M8 capture sources and output sinks on the local machine.
///
/// Output always goes through cpal. Capture is chosen per session from
/// [`BridgeConfig::capture_backend`]; `Auto` prefers the USB endpoint when a
/// device handle was attached and otherwise uses the platform capture device.
pub struct DevicePlatform {
    enumerator: DeviceEnumerator,
    #[cfg(feature = "usb")]
    usb: Option<SharedUsbHandle>,
}

impl DevicePlatform {
    pub fn new() -> Self {
        Self::with_enumerator(DeviceEnumerator::new())
    }

    pub fn with_enumerator(enumerator: DeviceEnumerator) -> Self {
        Self {
            enumerator,
            #[cfg(feature = "usb")]
            usb: None,
        }
    }

    /// Capture from the isochronous endpoint of this open M8 handle.
    #[cfg(feature = "usb")]
    pub fn with_usb_handle(mut self, handle: SharedUsbHandle) -> Self {
        self.usb = Some(handle);
        self
    }

    pub fn enumerator(&self) -> &DeviceEnumerator {
        &self.enumerator
    }

    fn has_usb_handle(&self) -> bool {
        #[cfg(feature = "usb")]
        {
            self.usb.is_some()
        }
        #[cfg(not(feature = "usb"))]
        {
            false
        }
    }

    #[cfg(feature = "usb")]
    fn open_isochronous(&self, config: &BridgeConfig) -> Result<Box<dyn CaptureSource>, BridgeError> {
        let handle = self.usb.as_ref().ok_or_else(|| BridgeError::DeviceNotFound {
            pattern: CAPTURE_DEVICE_PATTERN.to_string(),
        })?;
        Ok(Box::new(IsochronousCapture::open(Arc::clone(handle), &config.usb)?))
    }

    #[cfg(not(feature = "usb"))]
    fn open_isochronous(&self, _config: &BridgeConfig) -> Result<Box<dyn CaptureSource>, BridgeError> {
        Err(BridgeError::ConfigurationFailed(
            "isochronous capture requires the usb feature".into(),
        ))
    }
}

impl Default for DevicePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlatform for DevicePlatform {
    fn open_capture(&mut self, config: &BridgeConfig) -> Result<Box<dyn CaptureSource>, BridgeError> {
        let backend = resolve_backend(config.capture_backend, self.has_usb_handle(), config.delivery);
        log::debug!("capture backend: {:?}", backend);

        match backend {
            CaptureBackend::Isochronous => self.open_isochronous(config),
            CaptureBackend::Stream => Ok(Box::new(StreamCapture::open(
                &self.enumerator,
                config,
                CAPTURE_DEVICE_PATTERN,
            )?)),
            CaptureBackend::Polled | CaptureBackend::Auto => Ok(Box::new(PolledCapture::open(
                &self.enumerator,
                config,
                CAPTURE_DEVICE_PATTERN,
            )?)),
        }
    }

    fn open_sink(&mut self, config: &BridgeConfig) -> Result<Box<dyn PlaybackSink>, BridgeError> {
        Ok(Box::new(CpalPlaybackSink::open(&self.enumerator, config)?))
    }
}

/// The capture backend a session actually uses.
///
/// `Auto` picks isochronous capture when a USB handle is available, else
/// stream capture for pull-model output and polled capture for push-model
/// output. Explicit choices pass through.
pub fn resolve_backend(
    requested: CaptureBackend,
    has_usb_handle: bool,
    delivery: DeliveryModel,
) -> CaptureBackend {
    match requested {
        CaptureBackend::Auto if has_usb_handle => CaptureBackend::Isochronous,
        CaptureBackend::Auto => match delivery {
            DeliveryModel::Pull => CaptureBackend::Stream,
            DeliveryModel::Push => CaptureBackend::Polled,
        },
        explicit => explicit,
    }
}
