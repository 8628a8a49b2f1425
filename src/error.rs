/// Errors returned by the crate.
///
/// Every failing operation maps to exactly one of these; partial results are
/// never silently reported as success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Serial read error
    Read,
    /// Serial write error
    Write,
    /// Timed out while waiting for a response. Recoverable; the caller may
    /// retry the enclosing operation with a fresh deadline.
    Timeout,
    /// The modem replied, but not with anything the current operation can use
    InvalidResponse,
    /// Command buffer overflow. The assembled command would exceed the
    /// modem's command-length limit; a caller error, not a retryable fault.
    Overflow,
    /// Failed to parse a value out of a received response
    Parse,
    /// Modem replied with the generic `ERROR` token
    Error,
    /// GSM equipment related error (`+CME ERROR:<n>`)
    CmeError(u16),
    /// GSM network related error (`+CMS ERROR:<n>`)
    CmsError(u16),
    /// The caller-provided output buffer is too small for the response.
    /// Semantics-bearing output is never partially filled.
    BufferTooSmall,
    /// Operation invoked in a session state that does not allow it, e.g.
    /// opening an FTP session while a TCP session is open
    IllegalState,
    /// Network registration has not been established
    NotRegistered,
    /// The request completed on the wire but the server answered with a
    /// non-2xx HTTP status code
    HttpStatus(u16),
}
