//! C ABI for host applications.
//!
//! Every entry point accepts NULL handles, returns a neutral default on
//! misuse and catches panics before they reach the caller.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use parking_lot::Mutex;

use crate::audio::PcmProducer;
use crate::client::{ClientHandle, ConnectionState};
use crate::config::ClientConfig;
use crate::logging::{self, LogLevel};

pub const VERSION: &str = "0.34.0-snapforge";
pub const PROTOCOL_VERSION: c_int = 2;

static VERSION_C: &[u8] = b"0.34.0-snapforge\0";

pub type SnapClientStateCallback = Option<unsafe extern "C" fn(ctx: *mut c_void, state: c_int)>;
pub type SnapClientSettingsCallback =
    Option<unsafe extern "C" fn(ctx: *mut c_void, volume: c_int, muted: bool, latency_ms: c_int)>;
pub type SnapClientLogCallback =
    Option<unsafe extern "C" fn(ctx: *mut c_void, level: c_int, message: *const c_char)>;

/// Opaque client handed to C.
pub struct SnapClient {
    handle: ClientHandle,
    feed: Mutex<PcmProducer>,
}

/// Host context pointer. The host guarantees it stays valid while the
/// callback is registered and that it may be used from any thread.
#[derive(Clone, Copy)]
struct HostContext(*mut c_void);

unsafe impl Send for HostContext {}
unsafe impl Sync for HostContext {}

fn guarded<R>(default: R, f: impl FnOnce() -> R) -> R {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        log::error!("panic caught at C boundary");
        default
    })
}

/// # Safety
/// `client` must be NULL or a live pointer from [`snapclient_create`].
unsafe fn with_client<R>(client: *mut SnapClient, default: R, f: impl FnOnce(&SnapClient) -> R) -> R {
    match client.as_ref() {
        Some(client) => guarded(default, || f(client)),
        None => default,
    }
}

// ─── Lifecycle ───

#[no_mangle]
pub extern "C" fn snapclient_create() -> *mut SnapClient {
    guarded(ptr::null_mut(), || {
        logging::init();
        let (handle, feed) = ClientHandle::create(ClientConfig::default());
        Box::into_raw(Box::new(SnapClient {
            handle,
            feed: Mutex::new(feed),
        }))
    })
}

/// Stop callbacks from starting. Call before `snapclient_destroy` when a
/// callback may be running on another thread.
///
/// # Safety
/// `client` must be NULL or a live pointer from [`snapclient_create`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_begin_destroy(client: *mut SnapClient) {
    with_client(client, (), |c| c.handle.begin_destroy());
}

/// # Safety
/// `client` must be NULL or a pointer from [`snapclient_create`] that has not
/// been destroyed yet. It is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn snapclient_destroy(client: *mut SnapClient) {
    if client.is_null() {
        return;
    }
    let client = Box::from_raw(client);
    guarded((), move || drop(client));
}

/// # Safety
/// `client` as for [`snapclient_begin_destroy`]; `host` must be NULL or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn snapclient_start(
    client: *mut SnapClient,
    host: *const c_char,
    port: c_int,
) -> bool {
    if host.is_null() {
        return false;
    }
    let Ok(host) = CStr::from_ptr(host).to_str() else {
        return false;
    };
    let Ok(port) = u16::try_from(port) else {
        return false;
    };
    with_client(client, false, |c| match c.handle.start(host, port) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("snapclient_start failed: {}", e);
            false
        }
    })
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_stop(client: *mut SnapClient) {
    with_client(client, (), |c| c.handle.stop());
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_is_connected(client: *mut SnapClient) -> bool {
    with_client(client, false, |c| c.handle.is_connected())
}

// ─── Playback ───

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_pause(client: *mut SnapClient) {
    with_client(client, (), |c| c.handle.pause());
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_resume(client: *mut SnapClient) {
    with_client(client, (), |c| c.handle.resume());
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_is_paused(client: *mut SnapClient) -> bool {
    with_client(client, false, |c| c.handle.is_paused())
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_volume(client: *mut SnapClient, percent: c_int) {
    with_client(client, (), |c| {
        c.handle.set_volume(percent);
    });
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_get_volume(client: *mut SnapClient) -> c_int {
    with_client(client, 0, |c| c.handle.volume() as c_int)
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_muted(client: *mut SnapClient, muted: bool) {
    with_client(client, (), |c| c.handle.set_muted(muted));
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_get_muted(client: *mut SnapClient) -> bool {
    with_client(client, false, |c| c.handle.is_muted())
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_latency(client: *mut SnapClient, latency_ms: c_int) {
    with_client(client, (), |c| {
        c.handle.set_latency(latency_ms);
    });
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_get_latency(client: *mut SnapClient) -> c_int {
    with_client(client, 0, |c| c.handle.latency())
}

/// Write interleaved signed 16-bit PCM in the feed format (48000:16:2).
/// Returns the number of samples accepted.
///
/// # Safety
/// `client` as for [`snapclient_begin_destroy`]; `samples` must point to
/// `count` readable values or be NULL.
#[no_mangle]
pub unsafe extern "C" fn snapclient_push_pcm_s16(
    client: *mut SnapClient,
    samples: *const i16,
    count: usize,
) -> usize {
    if samples.is_null() || count == 0 {
        return 0;
    }
    let samples = std::slice::from_raw_parts(samples, count);
    with_client(client, 0, |c| c.feed.lock().push_s16(samples))
}

// ─── Identity & State ───

/// # Safety
/// `client` as for [`snapclient_begin_destroy`]; `name` must be NULL or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_name(client: *mut SnapClient, name: *const c_char) {
    if name.is_null() {
        return;
    }
    let name = CStr::from_ptr(name).to_string_lossy();
    with_client(client, (), |c| c.handle.set_name(&name));
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_instance(client: *mut SnapClient, instance: c_int) {
    if let Ok(instance) = u32::try_from(instance) {
        with_client(client, (), |c| c.handle.set_instance(instance));
    }
}

/// # Safety
/// See [`snapclient_begin_destroy`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_get_state(client: *mut SnapClient) -> c_int {
    with_client(client, ConnectionState::Disconnected as c_int, |c| {
        c.handle.state() as c_int
    })
}

// ─── Callbacks ───

/// Pass NULL to unregister. The callback runs on whichever thread caused
/// the event and must not stop or destroy the client.
///
/// # Safety
/// `client` as for [`snapclient_begin_destroy`]; `ctx` must stay valid while
/// the callback is registered.
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_state_callback(
    client: *mut SnapClient,
    callback: SnapClientStateCallback,
    ctx: *mut c_void,
) {
    let ctx = HostContext(ctx);
    with_client(client, (), |c| match callback {
        Some(callback) => c.handle.register_state_callback(move |state| {
            let ctx = ctx;
            // SAFETY: host contract on `callback` and `ctx`.
            unsafe { callback(ctx.0, state as c_int) }
        }),
        None => c.handle.clear_state_callback(),
    });
}

/// # Safety
/// See [`snapclient_set_state_callback`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_settings_callback(
    client: *mut SnapClient,
    callback: SnapClientSettingsCallback,
    ctx: *mut c_void,
) {
    let ctx = HostContext(ctx);
    with_client(client, (), |c| match callback {
        Some(callback) => c.handle.register_settings_callback(move |volume, muted, latency| {
            let ctx = ctx;
            // SAFETY: host contract on `callback` and `ctx`.
            unsafe { callback(ctx.0, volume as c_int, muted, latency) }
        }),
        None => c.handle.clear_settings_callback(),
    });
}

/// # Safety
/// See [`snapclient_set_state_callback`].
#[no_mangle]
pub unsafe extern "C" fn snapclient_set_log_callback(
    client: *mut SnapClient,
    callback: SnapClientLogCallback,
    ctx: *mut c_void,
) {
    let ctx = HostContext(ctx);
    with_client(client, (), |c| match callback {
        Some(callback) => c.handle.register_log_callback(move |level: LogLevel, message: &str| {
            let ctx = ctx;
            let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
            // SAFETY: host contract on `callback` and `ctx`; `message`
            // outlives the call.
            unsafe { callback(ctx.0, level as c_int, message.as_ptr()) }
        }),
        None => c.handle.clear_log_callback(),
    });
}

// ─── Version ───

#[no_mangle]
pub extern "C" fn snapclient_version() -> *const c_char {
    VERSION_C.as_ptr().cast()
}

#[no_mangle]
pub extern "C" fn snapclient_protocol_version() -> c_int {
    PROTOCOL_VERSION
}
