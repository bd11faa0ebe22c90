//! Event source: process panics.

use std::any::Any;
use std::backtrace::Backtrace;

use crate::queue::ReportQueue;
use crate::report::{trim_capture_frames, Failure};

/// Routes every panic to `queue`, then runs the previously installed hook.
///
/// The hook only enqueues. A panic on the thread that drives the runtime
/// unwinds out of `main` before the worker can file it, so run the
/// application in a spawned task and [`flush`](ReportQueue::flush) the queue
/// once that task has finished.
pub fn install_panic_hook(queue: ReportQueue) {
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        let message = panic_message(info.payload());
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
        let backtrace = trim_capture_frames(&Backtrace::force_capture().to_string());

        queue.submit(Failure::from_panic(&message, location.as_deref(), &backtrace));
        previous(info);
    }));
}

/// Text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let static_payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(static_payload.as_ref()), "static message");

        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(owned_payload.as_ref()), "owned message");

        let opaque: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(opaque.as_ref()), "Box<dyn Any>");
    }
}
