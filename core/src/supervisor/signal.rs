// Signal delivery to the supervised child by pid.

#[cfg(unix)]
fn send(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // kill(0, ..) and negative pids address process groups.
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to signal pid {pid}"),
            ));
        }
    };
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Sends SIGTERM.
#[cfg(unix)]
pub(crate) fn terminate(pid: u32) -> std::io::Result<()> {
    send(pid, libc::SIGTERM)
}

/// Sends SIGKILL.
#[cfg(unix)]
pub(crate) fn force_kill(pid: u32) -> std::io::Result<()> {
    send(pid, libc::SIGKILL)
}

/// Zero-signal probe. A process we may not signal still exists.
#[cfg(unix)]
pub(crate) fn is_alive(pid: u32) -> bool {
    match send(pid, 0) {
        Ok(()) => true,
        Err(err) => err.raw_os_error() == Some(libc::EPERM),
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signals are not available on this platform",
    ))
}

#[cfg(not(unix))]
pub(crate) fn force_kill(pid: u32) -> std::io::Result<()> {
    terminate(pid)
}

/// Without signals the session state is the only liveness source.
#[cfg(not(unix))]
pub(crate) fn is_alive(_pid: u32) -> bool {
    true
}
