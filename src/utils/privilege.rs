use log::warn;

/// Warn when the process lacks the privileges live capture usually needs.
///
/// The authoritative check is the capture open itself; this only gives the
/// operator the remediation command up front.
#[cfg(unix)]
pub fn check_capture_privileges() {
    if nix::unistd::Uid::effective().is_root() {
        return;
    }

    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "gatewatch-agent".to_string());

    warn!("Not running as root; packet capture requires elevated privileges.");
    warn!(
        "Run as root or grant capabilities: sudo setcap 'cap_net_raw,cap_net_admin=eip' {}",
        exe
    );
}

#[cfg(not(unix))]
pub fn check_capture_privileges() {}
