// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_schemas::builtin_interfaces::Time;
use log::warn;

/// Switches the calling thread to the real-time FIFO scheduler so frame
/// acquisition is not starved by the publishers.
#[cfg(target_os = "linux")]
pub fn set_thread_priority(priority: i32) {
    let mut param = libc::sched_param {
        sched_priority: priority,
    };
    let tid = unsafe { libc::pthread_self() };
    let err = unsafe {
        libc::pthread_setschedparam(tid, libc::SCHED_FIFO, &mut param as *mut libc::sched_param)
    };
    if err != 0 {
        let err = std::io::Error::from_raw_os_error(err);
        warn!("unable to set real-time fifo scheduler: {}", err);
    }
}

/// Real-time scheduling is only supported on Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_thread_priority(_priority: i32) {}

/// Monotonic timestamp used to stamp published headers.
pub fn timestamp() -> Result<Time, std::io::Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    #[cfg(target_os = "linux")]
    let clock = libc::CLOCK_MONOTONIC_RAW;
    #[cfg(not(target_os = "linux"))]
    let clock = libc::CLOCK_MONOTONIC;

    let err = unsafe { libc::clock_gettime(clock, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(Time {
        sec: tp.tv_sec as i32,
        nanosec: tp.tv_nsec as u32,
    })
}
