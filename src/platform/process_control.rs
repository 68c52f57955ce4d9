//! Process-control actions forwarded to the operating system.

use crate::core::process_monitor::ProcessAction;
use crate::error::ActionError;

/// Nice values accepted by `setpriority(2)`
pub const NICE_RANGE: std::ops::RangeInclusive<i32> = -20..=19;

#[cfg(unix)]
pub fn apply(pid: u32, action: ProcessAction) -> Result<(), ActionError> {
    let target = checked_pid(pid)?;

    if pid == std::process::id()
        && matches!(action, ProcessAction::Terminate | ProcessAction::Suspend)
    {
        return Err(ActionError::permission_denied(
            pid,
            "refusing to stop the monitor itself",
        ));
    }

    match action {
        ProcessAction::Terminate => send_signal(pid, target, libc::SIGTERM),
        ProcessAction::Suspend => send_signal(pid, target, libc::SIGSTOP),
        ProcessAction::Resume => send_signal(pid, target, libc::SIGCONT),
        ProcessAction::SetPriority(nice) => set_priority(pid, target, nice),
    }
}

/// pid 0 and negative pids address process groups in kill(2); never allow them
#[cfg(unix)]
fn checked_pid(pid: u32) -> Result<libc::pid_t, ActionError> {
    match libc::pid_t::try_from(pid) {
        Ok(target) if target > 0 => Ok(target),
        _ => Err(ActionError::not_found(pid, "no such process")),
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, target: libc::pid_t, signal: libc::c_int) -> Result<(), ActionError> {
    // SAFETY: kill(2) with a positive pid only addresses that one process
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(map_os_error(pid, std::io::Error::last_os_error()))
    }
}

#[cfg(unix)]
fn set_priority(pid: u32, target: libc::pid_t, nice: i32) -> Result<(), ActionError> {
    if !NICE_RANGE.contains(&nice) {
        return Err(ActionError::unsupported(
            pid,
            format!("nice value {} outside {:?}", nice, NICE_RANGE),
        ));
    }

    // SAFETY: plain syscall on a positive pid, no pointers involved
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, target as libc::id_t, nice) };
    if rc == 0 {
        Ok(())
    } else {
        Err(map_os_error(pid, std::io::Error::last_os_error()))
    }
}

#[cfg(unix)]
fn map_os_error(pid: u32, err: std::io::Error) -> ActionError {
    match err.raw_os_error() {
        Some(libc::ESRCH) => ActionError::not_found(pid, "no such process"),
        Some(libc::EPERM) | Some(libc::EACCES) => ActionError::permission_denied(pid, err.to_string()),
        _ => ActionError::unsupported(pid, err.to_string()),
    }
}

#[cfg(not(unix))]
pub fn apply(pid: u32, action: ProcessAction) -> Result<(), ActionError> {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    if action != ProcessAction::Terminate {
        return Err(ActionError::unsupported(
            pid,
            format!("{} is not available on this platform", action),
        ));
    }
    if pid == std::process::id() {
        return Err(ActionError::permission_denied(
            pid,
            "refusing to stop the monitor itself",
        ));
    }

    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::nothing(),
    );

    let process = system
        .process(target)
        .ok_or_else(|| ActionError::not_found(pid, "no such process"))?;
    if process.kill() {
        Ok(())
    } else {
        Err(ActionError::permission_denied(pid, "terminate request refused"))
    }
}
