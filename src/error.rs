use thiserror::Error;

use crate::inference::TaskState;
use crate::upload::UploadStatus;

/// Coarse classification shared by every error in the crate.
///
/// The HTTP layer maps each kind onto exactly one status code, and the
/// upload manager uses it to decide between "revert and let the client
/// retry" and "abort and clean up".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the caller (size, extension, range, name)
    Validation,
    /// Operation not allowed in the entity's current status
    State,
    /// Unknown session, slide, task or tile coordinate
    NotFound,
    /// Temporary storage or network failure; the operation may be retried
    Transient,
    /// Storage refused the operation; retrying will not help
    Permanent,
    /// Missing or invalid credentials
    Unauthorized,
    /// Bug or corrupted data on our side
    Internal,
}

/// I/O errors that can occur when reading from remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error reported by the object store
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for IoError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => IoError::NotFound(key),
            StorageError::Transient { .. } => IoError::Connection(err.to_string()),
            other => IoError::Storage(other.to_string()),
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Only JPEG-compressed tiles can be served
    #[error("Unsupported compression: {0} (only JPEG is supported)")]
    UnsupportedCompression(u16),

    /// No tiled image directory qualifies as a pyramid level
    #[error("File contains no tiled pyramid levels")]
    NoPyramid,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors surfaced by the object store gateway.
///
/// Every backend failure is classified as either [`StorageError::Transient`]
/// (retried by the gateway) or one of the permanent variants (surfaced
/// immediately).
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The object does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The multipart upload does not exist (completed, aborted or never started)
    #[error("Multipart upload not found: {0}")]
    UploadNotFound(String),

    /// A part tag supplied at completion differs from what storage recorded
    #[error("Part {part_number} does not match storage: expected tag {expected}, found {found}")]
    PartMismatch {
        part_number: u32,
        expected: String,
        found: String,
    },

    /// Timeouts, throttling, 5xx responses, dropped connections
    #[error("Transient storage failure during {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    /// Access denied, invalid request and everything else storage will keep refusing
    #[error("Storage failure during {operation}: {message}")]
    Permanent {
        operation: &'static str,
        message: String,
    },
}

impl StorageError {
    /// Whether the gateway should retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Transient { .. } => ErrorKind::Transient,
            StorageError::UploadNotFound(_)
            | StorageError::PartMismatch { .. }
            | StorageError::Permanent { .. } => ErrorKind::Permanent,
        }
    }
}

/// Errors from the upload session manager
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Rejected input: extension, size bounds, part number, display name
    #[error("{0}")]
    Validation(String),

    /// The session's status does not allow the operation
    #[error("Upload {session_id} is {status}: {message}")]
    InvalidState {
        session_id: String,
        status: UploadStatus,
        message: String,
    },

    /// Unknown session (or a session owned by someone else)
    #[error("Upload session not found: {0}")]
    NotFound(String),

    /// Storage failed after retries
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Slide record could not be created
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A background step panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Validation(_) => ErrorKind::Validation,
            UploadError::InvalidState { .. } => ErrorKind::State,
            UploadError::NotFound(_) => ErrorKind::NotFound,
            UploadError::Storage(err) => err.kind(),
            UploadError::Registry(err) => err.kind(),
            UploadError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from the slide registry
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Unknown slide (or a slide owned by someone else)
    #[error("Slide not found: {0}")]
    NotFound(String),

    /// Rejected input: empty or duplicate name, bad pagination
    #[error("{0}")]
    Validation(String),

    /// Removing the backing object failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::Storage(err) => err.kind(),
        }
    }
}

/// Errors that can occur while producing a Deep Zoom tile or descriptor
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Slide is not registered
    #[error("Slide not found: {slide_id}")]
    SlideNotFound { slide_id: String },

    /// Requested level is beyond the pyramid
    #[error("Level {level} out of range (max level is {max_level})")]
    LevelOutOfRange { level: u32, max_level: u32 },

    /// Tile path that does not name a level and `{col}_{row}.jpg`
    #[error("Invalid tile path: {path}")]
    InvalidTilePath { path: String },

    /// Requested column/row is outside the level's tile grid
    #[error("Tile ({col}, {row}) out of bounds at level {level} (grid is {cols}x{rows})")]
    TileOutOfBounds {
        level: u32,
        col: u32,
        row: u32,
        cols: u32,
        rows: u32,
    },

    /// Reading the source image failed
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The source image is not a readable pyramid
    #[error("Slide error: {0}")]
    Slide(TiffError),

    /// A source tile could not be decoded
    #[error("Failed to decode tile: {message}")]
    Decode { message: String },

    /// The output tile could not be encoded
    #[error("Failed to encode tile: {message}")]
    Encode { message: String },

    /// Resolving the slide failed
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<TiffError> for TileError {
    fn from(err: TiffError) -> Self {
        match err {
            TiffError::Io(io) => TileError::Io(io),
            other => TileError::Slide(other),
        }
    }
}

impl TileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TileError::SlideNotFound { .. }
            | TileError::LevelOutOfRange { .. }
            | TileError::InvalidTilePath { .. }
            | TileError::TileOutOfBounds { .. } => ErrorKind::NotFound,
            TileError::Io(IoError::NotFound(_)) => ErrorKind::NotFound,
            TileError::Io(IoError::Connection(_)) => ErrorKind::Transient,
            TileError::Io(_) => ErrorKind::Permanent,
            // The stored object is not a readable pyramid
            TileError::Slide(_) => ErrorKind::Permanent,
            TileError::Decode { .. } | TileError::Encode { .. } => ErrorKind::Internal,
            TileError::Registry(err) => err.kind(),
        }
    }
}

/// Errors from inference task tracking
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    /// Unknown task or slide
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad confidence, state filter or pagination
    #[error("{0}")]
    Validation(String),

    /// Transition not allowed from the task's state
    #[error("Task {task_id} is {state}: {message}")]
    InvalidState {
        task_id: String,
        state: TaskState,
        message: String,
    },

    /// No inference service is configured
    #[error("Inference service is not configured")]
    NotConfigured,

    /// The inference service failed or could not be reached
    #[error("Inference service error: {message}")]
    Upstream { message: String, transient: bool },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::NotFound(_) => ErrorKind::NotFound,
            InferenceError::Validation(_) => ErrorKind::Validation,
            InferenceError::InvalidState { .. } => ErrorKind::State,
            InferenceError::NotConfigured => ErrorKind::Transient,
            InferenceError::Upstream { transient, .. } => {
                if *transient {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            InferenceError::Registry(err) => err.kind(),
        }
    }
}
