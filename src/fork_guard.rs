//! Fork guard
//!
//! A forked child inherits the session, including the open output handle and
//! any buffered records. The guard remembers the owning process id; the first
//! notification seen under a different id trips it, and the child then stops
//! delivery and never writes to the inherited sink.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkStatus {
    /// Running in the process that created the session
    Owner,
    /// Running in a forked child
    Forked,
}

#[derive(Debug, Clone)]
pub struct ForkGuard {
    owner_pid: u32,
    tripped: bool,
}

impl ForkGuard {
    pub fn new(owner_pid: u32) -> Self {
        Self {
            owner_pid,
            tripped: false,
        }
    }

    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    /// Compare `current_pid` against the owner; a mismatch trips the guard
    pub fn check(&mut self, current_pid: u32) -> ForkStatus {
        if self.tripped || current_pid != self.owner_pid {
            self.tripped = true;
            ForkStatus::Forked
        } else {
            ForkStatus::Owner
        }
    }

    /// Whether a fork has been observed
    pub fn tripped(&self) -> bool {
        self.tripped
    }
}
