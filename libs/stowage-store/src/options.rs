//! Options controlling read and write behavior of the stores.

/// Options applied to lookups and key scans.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Identify blocks by their whole CID instead of just their multihash.
    ///
    /// When set, `has`, `get` and `get_size` only answer for a key whose full
    /// CID is present in the archive, the key scan emits the original recorded
    /// CIDs, and deduplication on `put` compares whole CIDs. The default is to
    /// compare multihashes only.
    pub use_whole_cids: bool,

    /// Treat a zero-length section as the end of the data payload rather than
    /// an error.
    pub zero_length_section_as_eof: bool,

    /// Verify hashes when reading blocks.
    ///
    /// Declared for interface compatibility; hashing on reads currently never
    /// happens and the flag has no effect.
    pub hash_on_read: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_use_whole_cids(mut self, enable: bool) -> Self {
        self.use_whole_cids = enable;
        self
    }

    pub fn with_zero_length_section_as_eof(mut self, enable: bool) -> Self {
        self.zero_length_section_as_eof = enable;
        self
    }

    pub fn with_hash_on_read(mut self, enable: bool) -> Self {
        self.hash_on_read = enable;
        self
    }
}

/// Options applied to write sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Disable deduplication on `put`, storing every block as given.
    pub allow_duplicate_puts: bool,

    /// Zero bytes inserted between the v2 header and the data payload.
    ///
    /// Must match across resumptions of the same file, since it determines
    /// where the data payload is located.
    pub data_padding: u64,

    /// Zero bytes inserted between the data payload and the index.
    pub index_padding: u64,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_duplicate_puts(mut self, enable: bool) -> Self {
        self.allow_duplicate_puts = enable;
        self
    }

    pub fn with_data_padding(mut self, padding: u64) -> Self {
        self.data_padding = padding;
        self
    }

    pub fn with_index_padding(mut self, padding: u64) -> Self {
        self.index_padding = padding;
        self
    }
}
