mod block_cache;
mod object_reader;
mod range_reader;
mod singleflight;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use object_reader::ObjectRangeReader;
pub use range_reader::{BytesReader, RangeReader};
pub use singleflight::SingleFlight;
