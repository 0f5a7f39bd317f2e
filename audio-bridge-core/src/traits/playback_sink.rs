use std::sync::Arc;

use crate::models::audio_models::DeviceDescriptor;
use crate::models::config::DeliveryModel;
use crate::models::error::BridgeError;
use crate::processing::render::Renderer;

/// Interface for the host audio output.
///
/// The sink's real-time callback renders through the [`Renderer`] it is
/// started with: [`Renderer::fill`] for [`DeliveryModel::Push`],
/// [`Renderer::feed`] for [`DeliveryModel::Pull`]. Device loss detected in a
/// callback is reported with [`Renderer::mark_lost`].
pub trait PlaybackSink {
    fn model(&self) -> DeliveryModel;

    /// The output device this sink opened.
    fn device_info(&self) -> DeviceDescriptor;

    /// Start playback, rendering from `renderer`.
    fn start(&mut self, renderer: Arc<Renderer>) -> Result<(), BridgeError>;

    fn pause(&mut self) -> Result<(), BridgeError>;

    fn resume(&mut self) -> Result<(), BridgeError>;

    /// Stop playback and close the device.
    ///
    /// After this returns the render callback never runs again.
    fn stop(&mut self);
}
