// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate-wide error type. Structured variants carry the failing operation's
// parameters so nested failures stay traceable, per spec.md §7.

use crate::domain::{MaxSize, Range, SegmentId, Size, StorageId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("allocation of {requested} bytes would exceed capacity ({used} used, max {max:?})")]
    BadAlloc {
        requested: Size,
        used: Size,
        max: MaxSize,
    },

    #[error("unknown storage id {0}")]
    UnknownId(StorageId),

    #[error("unknown segment id {0} in {1}")]
    UnknownSegmentId(SegmentId, StorageId),

    #[error("block {0} is not located in any registered storage")]
    BlockNotInAnyStorage(u64),

    #[error("ranges are not touching: {small} and {large}")]
    RangesAreNotTouching { small: Range, large: Range },

    #[error("append range {to_append} does not touch existing range {existing}")]
    AppendRangesAreNotTouching { existing: Range, to_append: Range },

    #[error("duplicate storage id {0} in placement")]
    EmplaceDuplicate(StorageId),

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("C-ABI method not provided: {0}")]
    MethodNotProvided(&'static str),

    #[error("C-ABI implementation reported an error: {0:?}")]
    ImplementationError(Vec<u8>),

    #[error("handler error: {0}")]
    HandlerError(String),

    #[error("short transfer: could not {operation} all data ({transferred} of {requested} bytes)")]
    ShortTransfer {
        operation: &'static str,
        transferred: u64,
        requested: u64,
    },

    #[error("timed out waiting for result")]
    Timeout,

    #[error("interrupted")]
    Interrupted,

    #[error("timed out acquiring communication buffer slot")]
    BitmapSetTimeout,

    #[error("instance must not be null")]
    InstanceMustNotBeNull,

    #[error("access token does not belong to this registry")]
    AccessTokenDoesNotBelongToThis,

    #[error("unsupported: request buffer partially overlaps a registered shared buffer")]
    Unsupported,

    #[error("double free or corruption.")]
    DoubleFree,

    #[error("cast signed to unsigned: offset {0} is negative")]
    CastSignedToUnsigned(i64),

    #[error("write of {size} bytes at offset {offset} exceeds max size {max:?} of collection {collection}")]
    WriteAfterMaxSize {
        collection: String,
        offset: i64,
        size: Size,
        max: Size,
    },

    #[error("read of {size} bytes at offset {offset} exceeds current size {current:?} of collection {collection}")]
    ReadAfterSize {
        collection: String,
        offset: i64,
        size: Size,
        current: Size,
    },

    #[error("collection {0} does not exist")]
    CollectionDoesNotExist(String),

    #[error("collection_open: meta data is nullptr")]
    MetaDataIsNull,

    #[error("meta-data back-end error: {0}")]
    MetaData(String),
}

impl Error {
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        Error::Io { operation, source }
    }
}
