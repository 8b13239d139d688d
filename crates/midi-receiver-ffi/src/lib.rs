//! C ABI for hosts that poll MIDI input once per frame.
//!
//! Two surfaces are exported:
//!
//! - `CountEndpoints`, `GetEndpointIdAtIndex`, `GetEndpointName` and
//!   `DequeueIncomingData` operate on a process-wide receiver created on first
//!   use. This is the surface game-engine plugin loaders bind against.
//! - `midi_receiver_*` functions take an explicit handle from
//!   `midi_receiver_create` for hosts that manage lifecycle themselves.
//!
//! No Rust panic crosses the boundary: every entry point returns its
//! "nothing to report" value instead.

use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use midi_receiver::{MidiDriver, MidiReceiver, MidirDriver, ReceiverConfig, EMPTY};
use once_cell::sync::Lazy;

type SystemReceiver = MidiReceiver<MidirDriver>;

/// Opaque handle to a receiver created by `midi_receiver_create`.
#[repr(C)]
pub struct MidiReceiverHandle {
    _private: [u8; 0],
}

static DEFAULT: Lazy<Option<SystemReceiver>> = Lazy::new(|| {
    match MidiReceiver::new(MidirDriver::new(), ReceiverConfig::default()) {
        Ok(receiver) => Some(receiver),
        Err(err) => {
            tracing::warn!(%err, "failed to start default midi receiver");
            None
        }
    }
});

thread_local! {
    static NAME_BUFFER: RefCell<CString> = RefCell::new(CString::default());
}

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("panic caught at midi-receiver FFI boundary");
            fallback
        }
    }
}

fn with_default<T>(fallback: T, f: impl FnOnce(&SystemReceiver) -> T) -> T {
    guarded(None, || DEFAULT.as_ref().map(f)).unwrap_or(fallback)
}

fn count<D: MidiDriver>(receiver: &MidiReceiver<D>) -> i32 {
    i32::try_from(receiver.count_sources()).unwrap_or(i32::MAX)
}

fn id_at<D: MidiDriver>(receiver: &MidiReceiver<D>, index: i32) -> u32 {
    let Ok(index) = usize::try_from(index) else {
        tracing::warn!(index, "negative midi source index");
        return 0;
    };
    receiver.source_id_at(index).unwrap_or_else(|err| {
        tracing::warn!(%err, "midi source index out of range");
        0
    })
}

fn name_of<D: MidiDriver>(receiver: &MidiReceiver<D>, id: u32) -> String {
    receiver.source_name(id).unwrap_or_default()
}

/// Copies `name` plus a terminating NUL into `out_buf`, truncating to
/// `capacity`. Returns the full length of `name` in bytes.
///
/// # Safety
///
/// `out_buf` must be null or point to at least `capacity` writable bytes.
unsafe fn copy_name(name: &str, out_buf: *mut c_char, capacity: usize) -> usize {
    let bytes = name.as_bytes();
    let needed = bytes.len();
    if out_buf.is_null() || capacity == 0 {
        return needed;
    }
    let copy_len = needed.min(capacity - 1);
    if copy_len > 0 {
        ptr::copy_nonoverlapping(bytes.as_ptr(), out_buf.cast::<u8>(), copy_len);
    }
    *out_buf.add(copy_len) = 0;
    needed
}

fn to_c_string(name: String) -> CString {
    CString::new(name).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|b| *b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}

// =============================================================================
// Process-wide receiver
// =============================================================================

/// Number of currently known MIDI sources.
#[no_mangle]
pub extern "C" fn CountEndpoints() -> i32 {
    with_default(0, count)
}

/// Stable id of the source at `index`, or 0 if `index` is out of range.
///
/// `index` must be below the value returned by the latest `CountEndpoints`.
#[no_mangle]
pub extern "C" fn GetEndpointIdAtIndex(index: i32) -> u32 {
    with_default(0, |receiver| id_at(receiver, index))
}

/// Display name of the source with the given id, or an empty string if it is
/// no longer present.
///
/// The returned pointer stays valid until the next call to this function on
/// the same thread.
#[no_mangle]
pub extern "C" fn GetEndpointName(id: u32) -> *const c_char {
    let name = with_default(String::new(), |receiver| name_of(receiver, id));
    NAME_BUFFER.with(|buffer| {
        let mut buffer = buffer.borrow_mut();
        *buffer = to_c_string(name);
        buffer.as_ptr()
    })
}

/// Pops the oldest encoded message, or 0 if none is queued.
#[no_mangle]
pub extern "C" fn DequeueIncomingData() -> u64 {
    with_default(EMPTY, |receiver| receiver.dequeue())
}

// =============================================================================
// Handle-based receiver
// =============================================================================

/// Creates a receiver on the platform MIDI service. Returns null on failure.
#[no_mangle]
pub extern "C" fn midi_receiver_create() -> *mut MidiReceiverHandle {
    guarded(ptr::null_mut(), || {
        match MidiReceiver::new(MidirDriver::new(), ReceiverConfig::default()) {
            Ok(receiver) => Box::into_raw(Box::new(receiver)).cast::<MidiReceiverHandle>(),
            Err(err) => {
                tracing::warn!(%err, "failed to create midi receiver");
                ptr::null_mut()
            }
        }
    })
}

/// Destroys a receiver, closing all of its connections.
///
/// # Safety
///
/// `handle` must be null or a pointer returned by `midi_receiver_create` that
/// has not been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn midi_receiver_destroy(handle: *mut MidiReceiverHandle) {
    if handle.is_null() {
        return;
    }
    let receiver = Box::from_raw(handle.cast::<SystemReceiver>());
    guarded((), move || drop(receiver));
}

/// Handle-based `CountEndpoints`.
///
/// # Safety
///
/// `handle` must be null or a live pointer from `midi_receiver_create`.
#[no_mangle]
pub unsafe extern "C" fn midi_receiver_count_sources(handle: *const MidiReceiverHandle) -> i32 {
    match handle.cast::<SystemReceiver>().as_ref() {
        Some(receiver) => guarded(0, || count(receiver)),
        None => 0,
    }
}

/// Handle-based `GetEndpointIdAtIndex`.
///
/// # Safety
///
/// `handle` must be null or a live pointer from `midi_receiver_create`.
#[no_mangle]
pub unsafe extern "C" fn midi_receiver_source_id_at(
    handle: *const MidiReceiverHandle,
    index: i32,
) -> u32 {
    match handle.cast::<SystemReceiver>().as_ref() {
        Some(receiver) => guarded(0, || id_at(receiver, index)),
        None => 0,
    }
}

/// Copies the display name of `id` into `out_buf` (NUL-terminated, truncated
/// to `capacity`) and returns the name's full length in bytes. Returns 0 and
/// writes an empty string if the source is gone.
///
/// # Safety
///
/// - `handle` must be null or a live pointer from `midi_receiver_create`
/// - `out_buf` must be null or point to at least `capacity` writable bytes
#[no_mangle]
pub unsafe extern "C" fn midi_receiver_source_name(
    handle: *const MidiReceiverHandle,
    id: u32,
    out_buf: *mut c_char,
    capacity: usize,
) -> usize {
    let name = match handle.cast::<SystemReceiver>().as_ref() {
        Some(receiver) => guarded(String::new(), || name_of(receiver, id)),
        None => String::new(),
    };
    copy_name(&name, out_buf, capacity)
}

/// Handle-based `DequeueIncomingData`.
///
/// # Safety
///
/// `handle` must be null or a live pointer from `midi_receiver_create`.
#[no_mangle]
pub unsafe extern "C" fn midi_receiver_dequeue(handle: *const MidiReceiverHandle) -> u64 {
    match handle.cast::<SystemReceiver>().as_ref() {
        Some(receiver) => guarded(EMPTY, || receiver.dequeue()),
        None => EMPTY,
    }
}

/// Forces a rescan of MIDI sources on the next call.
///
/// # Safety
///
/// `handle` must be null or a live pointer from `midi_receiver_create`.
#[no_mangle]
pub unsafe extern "C" fn midi_receiver_invalidate(handle: *const MidiReceiverHandle) {
    if let Some(receiver) = handle.cast::<SystemReceiver>().as_ref() {
        receiver.invalidate();
    }
}
