//! トレーサーのテスト対象
//!
//! ```text
//! tsubaki-tracee ops <N>      tracee_operation を N 回呼ぶ
//! tsubaki-tracee signals <N>  SIGUSR1 を受け続けながら tracee_operation を N 回呼ぶ
//! tsubaki-tracee segv         不正なアドレスに書き込む
//! ```

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// トレース対象の操作
#[no_mangle]
#[inline(never)]
pub extern "C" fn tracee_operation(value: u64) -> u64 {
    black_box(value).wrapping_mul(3)
}

extern "C" fn on_signal(_: nix::libc::c_int) {}

fn operations(count: u64) {
    for i in 0..count {
        black_box(tracee_operation(i));
    }
}

/// 別スレッドからメインスレッドにSIGUSR1を送り続けながら操作を行う
fn operations_under_signals(count: u64) {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // ハンドラは何もしない
    unsafe { sigaction(Signal::SIGUSR1, &action) }.expect("sigaction failed");

    let main_thread = unsafe { nix::libc::pthread_self() };
    let done = Arc::new(AtomicBool::new(false));
    let sender = {
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                unsafe { nix::libc::pthread_kill(main_thread, nix::libc::SIGUSR1) };
                std::thread::sleep(Duration::from_micros(20));
            }
        })
    };

    operations(count);

    done.store(true, Ordering::Relaxed);
    let _ = sender.join();
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let count = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);

    match args.get(1).map(String::as_str) {
        Some("ops") => operations(count),
        Some("signals") => operations_under_signals(count),
        Some("segv") => unsafe { (0x10 as *mut u8).write_volatile(1) },
        _ => {}
    }
}
