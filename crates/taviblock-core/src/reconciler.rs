//! Hosts-file reconciler
//!
//! Owns the region of the hosts file between the two sentinel markers and
//! makes it match the effective blocked set. Nothing outside the markers is
//! ever altered, and a partially written file is never visible: the new
//! content goes to a temporary sibling, is fsynced, and atomically renamed
//! over the hosts path.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::BlockedSet;

/// First sentinel line of the managed region
pub const BLOCKER_START: &str = "# BLOCKER START";

/// Last sentinel line of the managed region
pub const BLOCKER_END: &str = "# BLOCKER END";

/// Subdomain prefixes blocked alongside a registrable domain
const COMMON_SUBDOMAINS: &[&str] = &["www", "m", "mobile", "login", "app", "api"];

/// Expand blocked domains into the hostnames written to the managed region.
///
/// A registrable domain (exactly two labels) also blocks the common
/// subdomain prefixes; deeper names are written as-is.
pub fn expand_blocked_hostnames(domains: &BTreeSet<String>) -> BTreeSet<String> {
    let mut hostnames = BTreeSet::new();
    for domain in domains {
        hostnames.insert(domain.clone());
        if domain.split('.').count() == 2 {
            for prefix in COMMON_SUBDOMAINS {
                hostnames.insert(format!("{}.{}", prefix, domain));
            }
        }
    }
    hostnames
}

/// Idempotent writer for the managed hosts-file region
pub struct HostsReconciler {
    hosts_path: PathBuf,
}

impl HostsReconciler {
    pub fn new(hosts_path: impl Into<PathBuf>) -> Self {
        Self {
            hosts_path: hosts_path.into(),
        }
    }

    pub fn hosts_path(&self) -> &Path {
        &self.hosts_path
    }

    /// Make the managed region match `blocked`.
    ///
    /// Returns `true` when the file was rewritten, `false` when it already
    /// matched byte for byte.
    pub fn reconcile(&self, blocked: &BlockedSet) -> io::Result<bool> {
        let current = match fs::read_to_string(&self.hosts_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let rebuilt = rebuild(&current, blocked);
        if rebuilt == current {
            debug!("Hosts file already up to date");
            return Ok(false);
        }

        self.replace_atomically(&rebuilt)?;
        info!(
            domains = blocked.len(),
            path = %self.hosts_path.display(),
            "Hosts file updated"
        );
        Ok(true)
    }

    fn replace_atomically(&self, content: &str) -> io::Result<()> {
        let file_name = self
            .hosts_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "hosts".into());
        let tmp_path = self
            .hosts_path
            .with_file_name(format!("{}.taviblock-tmp", file_name));

        let original_meta = fs::metadata(&self.hosts_path).ok();

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        if let Some(meta) = &original_meta {
            fs::set_permissions(&tmp_path, meta.permissions())?;
            let uid = nix::unistd::Uid::from_raw(meta.uid());
            let gid = nix::unistd::Gid::from_raw(meta.gid());
            if let Err(e) = nix::unistd::chown(&tmp_path, Some(uid), Some(gid)) {
                // Expected when running unprivileged against a test file
                warn!(error = %e, "Could not preserve hosts file owner");
            }
        }

        fs::rename(&tmp_path, &self.hosts_path)
    }
}

/// Splice the managed region into the current file content. When the
/// markers are missing they are appended at the end.
fn rebuild(current: &str, blocked: &BlockedSet) -> String {
    let lines: Vec<&str> = current.lines().collect();

    let start = lines.iter().position(|l| l.trim() == BLOCKER_START);
    let end = lines.iter().position(|l| l.trim() == BLOCKER_END);

    let (prefix, suffix): (Vec<&str>, Vec<&str>) = match (start, end) {
        (Some(start), Some(end)) if start < end => {
            (lines[..start].to_vec(), lines[end + 1..].to_vec())
        }
        _ => (lines, Vec::new()),
    };

    let mut out: Vec<String> = prefix.iter().map(|l| l.to_string()).collect();
    out.push(BLOCKER_START.to_string());
    for hostname in expand_blocked_hostnames(blocked) {
        out.push(format!("127.0.0.1 {}", hostname));
        out.push(format!("::1 {}", hostname));
    }
    out.push(BLOCKER_END.to_string());
    out.extend(suffix.iter().map(|l| l.to_string()));

    let mut content = out.join("\n");
    content.push('\n');
    content
}
