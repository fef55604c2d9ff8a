//! Constants for MPEG-TS clock extraction and indexing

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Null packets are excluded from continuity-counter checking
pub const NULL_PID: u16 = 0x1FFF;

/// PIDs are a 13-bit space
pub const PID_TABLE_SIZE: usize = 8192;

/// PES packet constants
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// PCR/SCR constants
pub const SCR_CLOCK_HZ: u32 = 27_000_000; // 27 MHz
pub const MAX_SCR_VALUE: i64 = (1i64 << 33) * 300; // 33-bit base x300 + 9-bit extension

/// PTS/DTS constants
pub const PTS_CLOCK_HZ: u32 = 90_000; // 90 kHz
pub const MAX_PTS_VALUE: i64 = 1i64 << 33; // 33-bit PTS/DTS counter

/// Forward PTS deltas above this are legal wraps, not jumps (10 s at 90 kHz)
pub const PTS_JUMP_TICKS: i64 = 10 * 90_000;

/// Inspector defaults
pub const DEFAULT_SCR_PID: u16 = 0x31;
pub const DEFAULT_MAX_DRIFT_MS: i64 = 700;
pub const DEFAULT_TREND_SIZE: usize = 60 * 60 * 60; // 1 hr of 60 fps
pub const MIN_TREND_SIZE: usize = 60;
pub const DEFAULT_REPORT_PERIOD_SECS: u64 = 15;
pub const MIN_REPORT_PERIOD_SECS: u64 = 5;

/// Trend samples discarded per PID while the model stabilises
pub const TREND_WARMUP_SAMPLES: u64 = 16;

/// Report headers are re-emitted every this many lines
pub const REPORT_HEADER_LINES: u32 = 24;

/// Ingest read buffer (bytes)
pub const READ_BUFFER_BYTES: usize = TS_PACKET_SIZE * 1024;

/// Indexer scan chunk, rounded down to packet alignment
pub const INDEX_CHUNK_BYTES: usize = (16 * 1_048_576 / TS_PACKET_SIZE) * TS_PACKET_SIZE;

/// Files below this are read whole by the fast duration query
pub const FAST_QUERY_WHOLE_FILE_BYTES: u64 = 32 * 1_048_576;

/// Head/tail window read by the fast duration query on large files
pub const FAST_QUERY_SEGMENT_BYTES: usize = 16 * 1_048_576;

/// Slicer copy block (64 packets)
pub const SLICE_BLOCK_BYTES: usize = TS_PACKET_SIZE * 64;
