use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::ConfigError;

/// Driver API errors. Rejected calls leave all driver state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Hardware for {0} units provided")]
    Hardware(usize),
    #[error("Unknown group")]
    InvalidGroup,
    #[error("Unknown unit")]
    InvalidUnit,
    #[error("Conversion in progress")]
    Busy,
    #[error("Group idle")]
    Idle,
    #[error("No result buffer")]
    NoBuffer,
    #[error("Result buffer too small")]
    BufferTooSmall,
    #[error("Operation not allowed for the group trigger source")]
    WrongTrigger,
    #[error("No notification configured")]
    NoNotification,
    #[error("No result available")]
    NoResult,
    #[error("Conversion queue full")]
    QueueFull,
    #[error("Calibration failed")]
    Calibration,
    #[error("Calibration timed out")]
    Timeout,
    #[error(transparent)]
    Trigger(#[from] pdb::Error),
}

/// Device errors reported to the [crate::ErrorSink].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    IntoPrimitive,
    TryFromPrimitive,
    strum::IntoStaticStr,
)]
#[repr(u8)]
pub enum ErrorId {
    /// An in-flight transfer did not stop within the abort bound.
    DmaAbortTimeout = 1,
    /// A pre-trigger fired before the previous conversion on its slot
    /// completed.
    SequenceError = 2,
    /// A start request found the unit queue full.
    QueueOverflow = 3,
    CalibrationTimeout = 4,
}
