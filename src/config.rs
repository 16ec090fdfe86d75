use std::time::Duration;

/// Step size for copy/read loops over big buffers (1 MiB)
pub const COPY_BLOCK_SIZE: usize = 1 << 20;

/// Initial capacity of the line reader's read buffer
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Largest capacity served by a wrapped (heap vector) buffer
pub const WRAPPED_BUFFER_MAX: usize = i32::MAX as usize;

/// Pause between the second and third big-buffer allocation attempts
pub const ALLOC_RETRY_SLEEP: Duration = Duration::from_millis(100);

/// Hash tables are sized to the next power of two >= this many slots per record
pub const TABLE_LOAD_FACTOR: usize = 4;

/// Smallest table any open-addressing structure allocates
pub const MIN_TABLE_SIZE: usize = 16;

/// Seed of the default polynomial hash; odd and non-zero so one-byte keys
/// still spread across the hash family
pub const DEFAULT_HASH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Multiplier of the default polynomial hash; the family continues with the next odd primes
pub const HASH_MULTIPLIER: u64 = 31;

/// Suffix of the persisted multimap bucket table
pub const INDEX_SUFFIX: &str = ".idx.snappy";

/// Buffer size for output writers
pub const WRITER_BUFFER_SIZE: usize = 256 * 1024;

/// Progress update interval (tick every N records)
pub const PROGRESS_INTERVAL: u64 = 10_000;
