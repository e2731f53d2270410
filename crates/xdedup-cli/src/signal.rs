use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use xdedup_core::pipeline::CancelToken;

/// Set on the first SIGINT/SIGTERM.
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// First signal sets [`SHUTDOWN`] and restores the default handler so a
/// second signal terminates immediately.
pub fn install_signal_handlers() {
    #[cfg(unix)]
    {
        // Safety: signal handler only sets an atomic bool and restores default handler.
        unsafe {
            libc::signal(
                libc::SIGTERM,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGINT,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
        }
    }
}

#[cfg(unix)]
extern "C" fn unix_signal_handler(sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}

/// Run `action`, cancelling `cancel` if a shutdown signal arrives meanwhile.
/// Input already read is still committed.
pub fn cancel_on_signal<T>(cancel: &CancelToken, action: impl FnOnce() -> T) -> T {
    let finished = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            while !finished.load(Ordering::Acquire) {
                if SHUTDOWN.load(Ordering::SeqCst) {
                    eprintln!("Interrupted: finishing files already read");
                    cancel.cancel();
                    return;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        });
        let out = action();
        finished.store(true, Ordering::Release);
        out
    })
}
