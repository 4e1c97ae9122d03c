/// Mount-time configuration, threaded explicitly through [`crate::Container`]
/// and [`crate::Volume`] rather than held in process-wide mutable statics.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Pin the container mount to a specific transaction id instead of the
    /// latest valid checkpoint. `None` means "most recent".
    pub xid: Option<u64>,

    /// Enable salvage ("lax") mode: checksum and format violations on
    /// read-only data paths are logged and the read continues with
    /// best-effort data instead of failing outright.
    ///
    /// Disabled by default; this mode can surface corrupted or
    /// inconsistent data and must be opted into explicitly.
    pub lax: bool,

    /// Passphrase for an encrypted volume, supplied by the embedder.
    /// This crate never prompts; see [`crate::Volume::password_hint`].
    pub passphrase: Option<String>,

    /// Mount a snapshot instead of the live volume state.
    pub snapshot_xid: Option<u64>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xid(mut self, xid: u64) -> Self {
        self.xid = Some(xid);
        self
    }

    pub fn with_lax(mut self, lax: bool) -> Self {
        self.lax = lax;
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_snapshot(mut self, snap_xid: u64) -> Self {
        self.snapshot_xid = Some(snap_xid);
        self
    }
}
