use std::fs;

/// Hostname of the machine, used as the default pod name.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            return name.to_string();
        }
    }
    "unknown".to_string()
}

/// Resident set size of this process in KiB, from /proc/self/status.
pub fn memory_usage_kb() -> u64 {
    read_proc_kb("/proc/self/status", "VmRSS:")
}

/// Total system memory in KiB, from /proc/meminfo.
pub fn total_memory_kb() -> u64 {
    read_proc_kb("/proc/meminfo", "MemTotal:")
}

fn read_proc_kb(path: &str, field: &str) -> u64 {
    let Ok(contents) = fs::read_to_string(path) else {
        return 0;
    };
    contents
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line[field.len()..].trim().split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_nonempty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn memory_readings_present_on_linux() {
        assert!(total_memory_kb() > 0);
        assert!(memory_usage_kb() > 0);
    }
}
