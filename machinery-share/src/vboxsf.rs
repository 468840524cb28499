//! Persistent `vboxsf` shares (spec §4.6): registers the host folder with
//! VirtualBox (VM must be off), mounts it once interactively to verify,
//! then rewrites `/var/lib/boot2docker/bootlocal.sh` between marker
//! comments so the mount is recreated on every boot.

use std::path::Path;

use machinery_core::error::{MachineryError, Result};
use machinery_remote::{UnixRemote, VBoxRemote};
use tracing::info;

const BEGIN_MARKER: &str = "# MACHINERY SHARES BEGIN";
const END_MARKER: &str = "# MACHINERY SHARES END";
const BOOTLOCAL_PATH: &str = "/var/lib/boot2docker/bootlocal.sh";

/// Builds the `mount -t vboxsf` line for one share, given the guest uid to
/// mount as.
fn mount_line(share_name: &str, guest_path: &str, uid: &str) -> String {
    format!(
        "mkdir -p {guest_path} && mount -t vboxsf -o uid={uid} {share_name} {guest_path}"
    )
}

/// Splices `new_lines` into `existing` between the marker comments,
/// creating the file with a shebang if it doesn't exist yet. Idempotent:
/// calling this again with a different share set replaces the whole
/// managed block rather than appending.
pub fn rewrite_bootlocal(existing: Option<&str>, new_lines: &[String]) -> String {
    let body = existing.unwrap_or("#!/bin/sh\n");
    let (prefix, suffix) = match (body.find(BEGIN_MARKER), body.find(END_MARKER)) {
        (Some(begin), Some(end)) if end > begin => {
            let end_of_marker = end + END_MARKER.len();
            (&body[..begin], &body[end_of_marker..])
        }
        _ => (body, ""),
    };

    let mut out = String::new();
    out.push_str(prefix.trim_end());
    out.push('\n');
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    for line in new_lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out.push_str(suffix.trim_start());
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Extracts the lines currently inside the managed block of an existing
/// `bootlocal.sh`, so a fresh `attach()` call for another share can be
/// added to the set instead of clobbering it.
fn extract_managed_lines(existing: &str) -> Vec<String> {
    match (existing.find(BEGIN_MARKER), existing.find(END_MARKER)) {
        (Some(begin), Some(end)) if end > begin => {
            let start = begin + BEGIN_MARKER.len();
            existing[start..end]
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Mounts `share_name` at `guest_path` on `vm_name`, halting it first if
/// running (VirtualBox requires the VM off to register a share), then
/// rewriting bootlocal.sh so the mount survives reboots.
pub fn attach(
    vbox: &VBoxRemote,
    remote: &UnixRemote,
    vm_name: &str,
    host_path: &Path,
    share_name: &str,
    guest_path: &str,
    guest_uid: &str,
    is_running: bool,
) -> Result<()> {
    if is_running {
        info!("halting '{vm_name}' to register shared folder '{share_name}'");
        vbox.graceful_halt(vm_name, 5, std::time::Duration::from_secs(5))?;
    }

    vbox.add_shared_folder(vm_name, host_path, share_name)?;

    let line = mount_line(share_name, guest_path, guest_uid);

    let existing = match remote.exec(&["cat".to_string(), BOOTLOCAL_PATH.to_string()], false) {
        Ok(lines) => Some(lines.join("\n")),
        Err(_) => None,
    };
    let mut managed_lines = existing.as_deref().map(extract_managed_lines).unwrap_or_default();
    if !managed_lines.contains(&line) {
        managed_lines.push(line.clone());
    }
    let rewritten = rewrite_bootlocal(existing.as_deref(), &managed_lines);
    let write_script = format!("cat > {BOOTLOCAL_PATH} <<'MACHINERY_BOOTLOCAL_EOF'\n{rewritten}MACHINERY_BOOTLOCAL_EOF\n");
    remote.exec(&["sh".to_string(), "-c".to_string(), write_script], false)?;
    remote.exec(&["chmod".to_string(), "+x".to_string(), BOOTLOCAL_PATH.to_string()], false)?;

    // Caller is responsible for starting the VM back up via the lifecycle
    // engine; here we only verify the mount once it's reachable again.
    remote.exec(&["sh".to_string(), "-c".to_string(), line], false)?;

    let mounts = remote.mount()?;
    let mounted = mounts.iter().any(|m| m.mount_point == guest_path);
    if !mounted {
        return Err(MachineryError::Tool(format!(
            "share '{share_name}' did not appear in guest mount table after mounting"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_line_includes_uid() {
        let line = mount_line("share1", "/workspace", "1000");
        assert!(line.contains("uid=1000"));
        assert!(line.contains("share1"));
        assert!(line.contains("/workspace"));
    }

    #[test]
    fn rewrite_creates_file_with_shebang_when_absent() {
        let out = rewrite_bootlocal(None, &["mount-cmd-1".to_string()]);
        assert!(out.starts_with("#!/bin/sh"));
        assert!(out.contains(BEGIN_MARKER));
        assert!(out.contains("mount-cmd-1"));
        assert!(out.contains(END_MARKER));
    }

    #[test]
    fn rewrite_replaces_existing_managed_block() {
        let existing = format!(
            "#!/bin/sh\necho hi\n{BEGIN_MARKER}\nold-mount\n{END_MARKER}\necho bye\n"
        );
        let out = rewrite_bootlocal(Some(&existing), &["new-mount".to_string()]);
        assert!(out.contains("echo hi"));
        assert!(out.contains("new-mount"));
        assert!(!out.contains("old-mount"));
        assert!(out.contains("echo bye"));
    }

    #[test]
    fn rewrite_is_idempotent_across_repeated_calls() {
        let first = rewrite_bootlocal(None, &["m1".to_string()]);
        let second = rewrite_bootlocal(Some(&first), &["m1".to_string(), "m2".to_string()]);
        assert_eq!(second.matches(BEGIN_MARKER).count(), 1);
        assert!(second.contains("m1"));
        assert!(second.contains("m2"));
    }

    #[test]
    fn extract_managed_lines_reads_existing_block() {
        let existing = format!("#!/bin/sh\n{BEGIN_MARKER}\nm1\nm2\n{END_MARKER}\n");
        let lines = extract_managed_lines(&existing);
        assert_eq!(lines, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn extract_managed_lines_empty_when_no_block() {
        assert!(extract_managed_lines("#!/bin/sh\necho hi\n").is_empty());
    }
}
