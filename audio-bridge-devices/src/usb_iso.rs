//! M8 capture from the USB isochronous audio endpoint via libusb.
//!
//! A fixed arena of transfers is kept in flight on the M8's isochronous IN
//! endpoint. Completions run inside whichever thread drives libusb event
//! handling (normally the host's USB loop) and push packet payloads straight
//! into the ring buffer through a [`CompletionHandler`].
//!
//! Shutdown order:
//! 1. Stop resubmitting and cancel every in-flight transfer
//! 2. Drive event handling until every cancellation has completed
//! 3. Free the arena, then release the interface
//!
//! If cancellations never complete within [`CANCEL_TIMEOUT`] the arena is
//! leaked instead of freed. It keeps its reference to the ring buffer, so a
//! late completion still writes into live memory.

use std::ffi::{c_int, c_uint, c_void, CStr};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusb::{constants, ffi, Context, DeviceHandle, UsbContext};

use audio_bridge_core::models::audio_models::{BridgeStats, DeviceDescriptor};
use audio_bridge_core::models::config::UsbEndpointConfig;
use audio_bridge_core::models::error::BridgeError;
use audio_bridge_core::processing::iso_packets::{
    CompletionHandler, IsoPacket, SlotTracker, TransferStatus,
};
use audio_bridge_core::processing::ring_buffer::RingBuffer;
use audio_bridge_core::traits::capture_source::{CaptureKind, CaptureSource};

/// The M8's device handle, shared with the host's serial connection.
pub type SharedUsbHandle = Arc<Mutex<DeviceHandle<Context>>>;

/// How long shutdown waits for cancelled transfers to come back.
pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

const EVENT_POLL: Duration = Duration::from_millis(10);

/// State shared by every transfer of one capture session.
struct IsoShared {
    handler: Mutex<CompletionHandler>,
    tracker: SlotTracker,
    packet_size: usize,
}

/// What a transfer's `user_data` points at.
struct SlotContext {
    shared: Arc<IsoShared>,
    slot: usize,
}

struct TransferSlot {
    transfer: NonNull<ffi::libusb_transfer>,
    _buffer: Vec<u8>,
    _context: Arc<SlotContext>,
}

/// The transfers, their buffers and their callback contexts.
///
/// Dropping the arena frees the transfers only when none is in flight;
/// otherwise everything is leaked.
struct TransferArena {
    slots: Vec<TransferSlot>,
    shared: Arc<IsoShared>,
}

impl TransferArena {
    fn allocate(
        handle: *mut ffi::libusb_device_handle,
        usb: &UsbEndpointConfig,
        shared: Arc<IsoShared>,
    ) -> Result<Self, BridgeError> {
        let mut arena = Self {
            slots: Vec::with_capacity(usb.slot_count),
            shared,
        };

        for slot in 0..usb.slot_count {
            // SAFETY: plain allocation, checked for null below.
            let raw = unsafe { ffi::libusb_alloc_transfer(usb.packets_per_transfer as c_int) };
            let transfer = NonNull::new(raw).ok_or_else(|| BridgeError::TransferSubmitFailed {
                slot,
                reason: "could not allocate transfer".into(),
            })?;

            let mut buffer = vec![0u8; usb.transfer_size()];
            let context = Arc::new(SlotContext {
                shared: Arc::clone(&arena.shared),
                slot,
            });

            // SAFETY: `transfer` was allocated with `packets_per_transfer`
            // packet descriptors; `buffer` and `context` live in the arena
            // alongside the transfer.
            unsafe {
                fill_iso_transfer(
                    transfer.as_ptr(),
                    handle,
                    usb,
                    buffer.as_mut_ptr(),
                    Arc::as_ptr(&context) as *mut c_void,
                );
            }

            arena.slots.push(TransferSlot {
                transfer,
                _buffer: buffer,
                _context: context,
            });
        }

        Ok(arena)
    }

    fn tracker(&self) -> &SlotTracker {
        &self.shared.tracker
    }

    /// Submit every idle slot. Fails only if no slot could be submitted.
    fn submit_all(&self) -> Result<usize, BridgeError> {
        let mut submitted = 0;
        let mut first_error = None;

        for (index, slot) in self.slots.iter().enumerate() {
            let transfer = slot.transfer.as_ptr();
            match self.tracker().submit(index, || submit_transfer(transfer)) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    log::error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if submitted == 0 => Err(e),
            _ => {
                log::debug!("{} of {} transfers submitted", submitted, self.slots.len());
                Ok(submitted)
            }
        }
    }

    /// Stop resubmission and cancel every transfer still in flight.
    fn cancel_all(&self) {
        self.tracker().begin_stop();
        for index in self.tracker().in_flight_slots() {
            let transfer = self.slots[index].transfer.as_ptr();
            // SAFETY: the transfer belongs to this arena and is still allocated.
            let rc = unsafe { ffi::libusb_cancel_transfer(transfer) };
            if rc < 0 && rc != constants::LIBUSB_ERROR_NOT_FOUND {
                log::error!("error cancelling transfer: {}", error_name(rc));
            }
        }
    }
}

impl Drop for TransferArena {
    fn drop(&mut self) {
        let in_flight = self.tracker().in_flight();
        if in_flight > 0 {
            log::error!(
                "{} transfers never completed after cancellation, leaking transfer arena",
                in_flight
            );
            std::mem::forget(std::mem::take(&mut self.slots));
            return;
        }

        for slot in self.slots.drain(..) {
            // SAFETY: no transfer is in flight, so libusb holds no reference
            // to it. The buffer is not owned by the transfer and is dropped
            // with the slot.
            unsafe { ffi::libusb_free_transfer(slot.transfer.as_ptr()) };
        }
    }
}

/// Fill an isochronous IN transfer with equally sized packets.
///
/// # Safety
/// `transfer` must have been allocated with at least
/// `usb.packets_per_transfer` packet descriptors, and `buffer` must point at
/// `usb.transfer_size()` writable bytes that outlive the transfer.
unsafe fn fill_iso_transfer(
    transfer: *mut ffi::libusb_transfer,
    handle: *mut ffi::libusb_device_handle,
    usb: &UsbEndpointConfig,
    buffer: *mut u8,
    user_data: *mut c_void,
) {
    unsafe {
        (*transfer).dev_handle = handle;
        (*transfer).endpoint = usb.endpoint;
        (*transfer).transfer_type = constants::LIBUSB_TRANSFER_TYPE_ISOCHRONOUS;
        (*transfer).timeout = 0;
        (*transfer).buffer = buffer;
        (*transfer).length = usb.transfer_size() as c_int;
        (*transfer).num_iso_packets = usb.packets_per_transfer as c_int;
        (*transfer).callback = on_transfer_complete;
        (*transfer).user_data = user_data;

        let descriptors = ptr::addr_of_mut!((*transfer).iso_packet_desc)
            .cast::<ffi::libusb_iso_packet_descriptor>();
        for i in 0..usb.packets_per_transfer {
            (*descriptors.add(i)).length = usb.packet_size as c_uint;
        }
    }
}

fn submit_transfer(transfer: *mut ffi::libusb_transfer) -> Result<(), String> {
    // SAFETY: only called with transfers filled by `fill_iso_transfer`
    // whose arena is alive.
    let rc = unsafe { ffi::libusb_submit_transfer(transfer) };
    if rc < 0 {
        Err(error_name(rc))
    } else {
        Ok(())
    }
}

fn error_name(code: c_int) -> String {
    // SAFETY: libusb_error_name returns a static NUL-terminated string for
    // any code.
    unsafe { CStr::from_ptr(ffi::libusb_error_name(code)) }
        .to_string_lossy()
        .into_owned()
}

/// Completion callback for every transfer in the arena.
extern "system" fn on_transfer_complete(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: libusb hands back a transfer filled by `fill_iso_transfer`;
    // its user_data points at the slot's context, which the arena keeps
    // alive while the transfer is in flight.
    let (status, context) = unsafe {
        (
            TransferStatus::from_raw((*transfer).status),
            &*((*transfer).user_data as *const SlotContext),
        )
    };
    let shared = &context.shared;

    if status != TransferStatus::Cancelled {
        // SAFETY: the transfer has completed, so its buffer and descriptors
        // are ours to read until it is resubmitted below.
        let packets = unsafe { iso_packets(transfer, shared.packet_size) };
        shared.handler.lock().process(packets);
    }

    shared
        .tracker
        .complete(context.slot, status, || submit_transfer(transfer));
}

/// The packets of a completed transfer.
///
/// # Safety
/// `transfer` must be a completed isochronous transfer whose packets are
/// each `packet_size` bytes apart in its buffer.
unsafe fn iso_packets<'a>(
    transfer: *const ffi::libusb_transfer,
    packet_size: usize,
) -> impl Iterator<Item = IsoPacket<'a>> {
    let (count, buffer, descriptors) = unsafe {
        (
            (*transfer).num_iso_packets.max(0) as usize,
            (*transfer).buffer as *const u8,
            ptr::addr_of!((*transfer).iso_packet_desc).cast::<ffi::libusb_iso_packet_descriptor>(),
        )
    };

    (0..count).map(move |i| {
        // SAFETY: `i < num_iso_packets`; each packet's payload lies within
        // its `packet_size` window of the buffer.
        unsafe {
            let descriptor = &*descriptors.add(i);
            let len = (descriptor.actual_length as usize).min(packet_size);
            IsoPacket {
                status: TransferStatus::from_raw(descriptor.status),
                payload: std::slice::from_raw_parts(buffer.add(i * packet_size), len),
            }
        }
    })
}

/// Kernel driver query result, with `NotSupported` meaning there is none.
fn kernel_driver_attached(result: rusb::Result<bool>) -> rusb::Result<bool> {
    match result {
        Err(rusb::Error::NotSupported) => Ok(false),
        other => other,
    }
}

/// Capture from the M8's isochronous audio endpoint.
pub struct IsochronousCapture {
    handle: SharedUsbHandle,
    context: Context,
    usb: UsbEndpointConfig,
    device: DeviceDescriptor,
    arena: Option<TransferArena>,
    claimed: bool,
}

impl IsochronousCapture {
    /// Claim the audio streaming interface of an open M8 handle.
    ///
    /// Detaches the kernel driver if one is bound, claims the interface and
    /// selects the streaming alternate setting. No transfer is submitted
    /// until [`CaptureSource::start`].
    pub fn open(handle: SharedUsbHandle, usb: &UsbEndpointConfig) -> Result<Self, BridgeError> {
        let iface = usb.interface;
        let (device, context) = {
            let mut h = handle.lock();
            let usb_device = h.device();
            let id = format!("usb:{:03}:{:03}", usb_device.bus_number(), usb_device.address());
            let name = usb_device
                .device_descriptor()
                .ok()
                .and_then(|d| h.read_product_string_ascii(&d).ok())
                .unwrap_or_else(|| "M8".to_string());
            let device = DeviceDescriptor::capture(id, name);

            let attached = kernel_driver_attached(h.kernel_driver_active(iface)).map_err(|e| {
                BridgeError::open_failed(
                    &device.name,
                    format!("error checking kernel driver status: {}", e),
                )
            })?;
            if attached {
                log::info!("detaching kernel driver");
                h.detach_kernel_driver(iface).map_err(|e| {
                    BridgeError::open_failed(&device.name, format!("could not detach kernel driver: {}", e))
                })?;
            }

            h.claim_interface(iface).map_err(|e| {
                BridgeError::open_failed(&device.name, format!("error claiming interface: {}", e))
            })?;
            if let Err(e) = h.set_alternate_setting(iface, usb.alt_setting) {
                if let Err(release_err) = h.release_interface(iface) {
                    log::warn!("error releasing interface {}: {}", iface, release_err);
                }
                return Err(BridgeError::open_failed(
                    &device.name,
                    format!("error setting alt setting: {}", e),
                ));
            }

            (device, h.context().clone())
        };

        log::info!("usb audio setup on interface {}", iface);
        Ok(Self {
            handle,
            context,
            usb: usb.clone(),
            device,
            arena: None,
            claimed: true,
        })
    }

    /// Drive libusb events until no transfer is in flight or `timeout`
    /// passes. Returns whether the arena drained.
    fn wait_idle(&self, tracker: &SlotTracker, timeout: Duration) -> bool {
        let started = Instant::now();
        while tracker.in_flight() > 0 {
            if started.elapsed() >= timeout {
                return false;
            }
            if let Err(e) = self.context.handle_events(Some(EVENT_POLL)) {
                log::warn!("usb event handling failed: {}", e);
            }
        }
        true
    }

    fn cancel_and_wait(&self, arena: &TransferArena) -> bool {
        arena.cancel_all();
        self.wait_idle(arena.tracker(), CANCEL_TIMEOUT)
    }
}

impl CaptureSource for IsochronousCapture {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Isochronous
    }

    fn device_info(&self) -> DeviceDescriptor {
        self.device.clone()
    }

    fn start(&mut self, buffer: Arc<RingBuffer>, stats: Arc<BridgeStats>) -> Result<(), BridgeError> {
        if !self.claimed {
            return Err(BridgeError::InvalidState("usb interface released".into()));
        }
        if self.arena.is_some() {
            return Err(BridgeError::InvalidState("usb capture already started".into()));
        }

        let shared = Arc::new(IsoShared {
            handler: Mutex::new(CompletionHandler::new(buffer, Arc::clone(&stats))),
            tracker: SlotTracker::new(self.usb.slot_count, stats),
            packet_size: self.usb.packet_size,
        });
        let raw_handle = self.handle.lock().as_raw();
        let arena = TransferArena::allocate(raw_handle, &self.usb, shared)?;
        let submitted = arena.submit_all();
        self.arena = Some(arena);
        submitted.map(|_| ())
    }

    fn pause(&mut self) -> Result<(), BridgeError> {
        let Some(ref arena) = self.arena else {
            return Ok(());
        };
        if self.cancel_and_wait(arena) {
            Ok(())
        } else {
            Err(BridgeError::InvalidState(format!(
                "{} transfers still in flight after cancellation",
                arena.tracker().in_flight()
            )))
        }
    }

    fn resume(&mut self) -> Result<(), BridgeError> {
        let Some(ref arena) = self.arena else {
            return Err(BridgeError::InvalidState("usb capture not started".into()));
        };
        if arena.tracker().in_flight() > 0 {
            return Ok(());
        }
        arena.tracker().reset();
        arena.submit_all().map(|_| ())
    }

    fn stop(&mut self) {
        if let Some(arena) = self.arena.take() {
            if !self.cancel_and_wait(&arena) {
                log::error!(
                    "transfers did not complete within {:?} of cancellation",
                    CANCEL_TIMEOUT
                );
            }
            drop(arena);
        }

        if self.claimed {
            self.claimed = false;
            log::info!("freeing interface {}", self.usb.interface);
            if let Err(e) = self.handle.lock().release_interface(self.usb.interface) {
                log::error!("error releasing interface: {}", e);
            }
        }
    }
}

impl Drop for IsochronousCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_kernel_driver_query_means_no_driver() {
        assert_eq!(kernel_driver_attached(Err(rusb::Error::NotSupported)), Ok(false));
        assert_eq!(kernel_driver_attached(Ok(true)), Ok(true));
        assert_eq!(
            kernel_driver_attached(Err(rusb::Error::NoDevice)),
            Err(rusb::Error::NoDevice)
        );
    }

    #[test]
    fn default_transfers_hold_two_packets() {
        let usb = UsbEndpointConfig::default();
        assert_eq!(usb.transfer_size(), 360);
        assert_eq!(usb.endpoint & 0x80, 0x80);
    }
}
