use thiserror::Error;

/// Terminal outcomes an operation future can fail with.
///
/// Every runtime error is surfaced on the future of the operation that
/// caused it; nothing is re-thrown through unrelated callers. The only
/// error raised synchronously is [`ChannelError::InvalidArgument`], which
/// comes straight out of a factory before any work is queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ChannelError {
  /// The channel is, or has become, permanently unavailable for the
  /// requested direction.
  #[error("channel is retired")]
  Retired,

  /// The deadline expired before a matching operation arrived.
  #[error("deadline expired before a match")]
  Timeout,

  /// The pending queue was at capacity and the configured overflow policy
  /// decided this operation is the one to fail.
  #[error("pending-queue capacity exceeded")]
  QueueOverflow,

  /// The operation lost a multi-channel selection that committed on
  /// another channel. Never surfaced out of the selection API itself.
  #[error("operation lost to a competing selection")]
  Canceled,

  /// A factory was handed a configuration it cannot honour.
  #[error("invalid configuration: {0}")]
  InvalidArgument(String),
}
