//! The Core Foundation run-loop thread backing one FSEvents stream.
//!
//! Each registered root owns a stream scheduled on a dedicated thread.
//! The stream holds the per-stream callback state and releases it through
//! the context's release callback when the stream itself is released.

use std::ffi::CStr;
use std::path::Path;
use std::ptr;
use std::thread::{self, JoinHandle};

use fsevent_sys as fs;
use fsevent_sys::core_foundation as cf;

use super::CallbackState;
use crate::error::RegistrationError;
use crate::{Error, Result};

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFRunLoopIsWaiting(run_loop: cf::CFRunLoopRef) -> u8;
}

/// A running FSEvents stream and the thread driving its run loop.
pub(crate) struct RunLoop {
    runloop: cf::CFRunLoopRef,
    thread: Option<JoinHandle<()>>,
}

// CFRunLoop references may be used from any thread per the Core
// Foundation thread-safety documentation.
unsafe impl Send for RunLoop {}

struct StreamRef(fs::FSEventStreamRef);
unsafe impl Send for StreamRef {}

struct RunLoopRef(cf::CFRunLoopRef);
unsafe impl Send for RunLoopRef {}

impl RunLoop {
    /// Create a stream for `path` and start its run-loop thread. Blocks
    /// until the stream is scheduled and started.
    pub(crate) fn spawn(
        path: &Path,
        latency: f64,
        file_level_events: bool,
        state: Box<CallbackState>,
    ) -> Result<Self> {
        let path_str = path.to_string_lossy().into_owned();

        let stream = unsafe {
            let mut err: cf::CFErrorRef = ptr::null_mut();
            let cf_path = cf::str_path_to_cfstring_ref(&path_str, &mut err);
            if cf_path.is_null() {
                return Err(RegistrationError::watch_failed(
                    path,
                    "could not convert path for the kernel",
                )
                .into());
            }

            let paths_to_watch =
                cf::CFArrayCreateMutable(cf::kCFAllocatorDefault, 0, &cf::kCFTypeArrayCallBacks);
            cf::CFArrayAppendValue(paths_to_watch, cf_path);
            cf::CFRelease(cf_path);

            let info = Box::into_raw(state);
            let context = fs::FSEventStreamContext {
                version: 0,
                info: info.cast::<libc::c_void>(),
                retain: None,
                release: Some(release_callback_state),
                copy_description: None,
            };

            let mut flags = fs::kFSEventStreamCreateFlagNoDefer;
            if file_level_events {
                flags |= fs::kFSEventStreamCreateFlagFileEvents;
            }

            let stream = fs::FSEventStreamCreate(
                cf::kCFAllocatorDefault,
                stream_callback,
                &context,
                paths_to_watch,
                fs::kFSEventStreamEventIdSinceNow,
                latency,
                flags,
            );
            cf::CFRelease(paths_to_watch);
            stream
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        let stream = StreamRef(stream);
        let thread = thread::Builder::new()
            .name(format!("treewatch fsevents {path_str}"))
            .spawn(move || {
                let stream = stream.0;
                unsafe {
                    let runloop = cf::CFRunLoopGetCurrent();
                    fs::FSEventStreamScheduleWithRunLoop(
                        stream,
                        runloop,
                        cf::kCFRunLoopDefaultMode,
                    );
                    if !fs::FSEventStreamStart(stream) {
                        fs::FSEventStreamInvalidate(stream);
                        fs::FSEventStreamRelease(stream);
                        let _ = tx.send(Err(Error::internal("could not start FSEvents stream")));
                        return;
                    }
                    let _ = tx.send(Ok(RunLoopRef(runloop)));

                    // Parked here until close() stops the loop.
                    cf::CFRunLoopRun();

                    fs::FSEventStreamStop(stream);
                    fs::FSEventStreamInvalidate(stream);
                    fs::FSEventStreamRelease(stream);
                }
            })
            .map_err(|e| Error::internal(format!("failed to spawn run-loop thread: {e}")))?;

        let runloop = rx
            .recv()
            .map_err(|_| Error::internal("run-loop thread exited before starting"))??;

        Ok(Self {
            runloop: runloop.0,
            thread: Some(thread),
        })
    }

    /// Stop the run loop and join its thread. Must not be called from the
    /// run-loop thread itself.
    pub(crate) fn close(mut self) {
        unsafe {
            // Let the loop reach its waiting state before stopping it, so
            // the stop is not lost during startup.
            while CFRunLoopIsWaiting(self.runloop) == 0 {
                thread::yield_now();
            }
            cf::CFRunLoopStop(self.runloop);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

extern "C" fn stream_callback(
    _stream_ref: fs::FSEventStreamRef,
    info: *mut libc::c_void,
    num_events: libc::size_t,
    event_paths: *mut libc::c_void,
    _event_flags: *const fs::FSEventStreamEventFlags,
    _event_ids: *const fs::FSEventStreamEventId,
) {
    let state = unsafe { &*info.cast::<CallbackState>() };
    let raw_paths = event_paths.cast::<*const libc::c_char>();

    let mut paths = Vec::with_capacity(num_events);
    for i in 0..num_events {
        let c_str = unsafe { CStr::from_ptr(*raw_paths.add(i)) };
        paths.push(c_str.to_string_lossy().into_owned());
    }

    state.on_paths(&paths);
}

extern "C" fn release_callback_state(info: *const libc::c_void) {
    unsafe {
        drop(Box::from_raw(
            info.cast_mut().cast::<CallbackState>(),
        ));
    }
}
