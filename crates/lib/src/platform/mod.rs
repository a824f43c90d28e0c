//! Host platform queries: well-known directories and the invoking user's ids.

pub mod paths;

/// Numeric user and group id of the invoking process.
///
/// Build scripts use these to hand ownership of produced artifacts back to the
/// host user after running as root inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIds {
  pub uid: u32,
  pub gid: u32,
}

impl HostIds {
  /// Ids of the current process.
  #[cfg(unix)]
  pub fn current() -> Self {
    Self {
      uid: rustix::process::getuid().as_raw(),
      gid: rustix::process::getgid().as_raw(),
    }
  }

  /// Non-unix hosts have no numeric ids; the container's root is used.
  #[cfg(not(unix))]
  pub fn current() -> Self {
    Self { uid: 0, gid: 0 }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(unix)]
  #[test]
  fn current_ids_match_process() {
    let ids = HostIds::current();
    assert_eq!(ids.uid, rustix::process::getuid().as_raw());
    assert_eq!(ids.gid, rustix::process::getgid().as_raw());
  }
}
