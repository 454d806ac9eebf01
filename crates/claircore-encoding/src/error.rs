/// A specialized result for digest operations
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by digest parsing and hashing operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Some underlying io error caused a hashing process to fail
    #[error("digest read error")]
    ReadError(#[source] std::io::Error),

    /// A digest string did not contain the required `algorithm:hex` separator
    #[error("invalid digest '{given}': missing ':' separator between algorithm and checksum")]
    MissingSeparator {
        /// A copy of the invalid string
        given: String,
    },

    /// A digest named an algorithm that this build does not recognize
    #[error("unknown digest algorithm '{algorithm}'")]
    UnknownAlgorithm {
        /// The algorithm tag that could not be resolved
        algorithm: String,
    },

    /// A digest's checksum portion was not valid hex, or decoded to the
    /// wrong number of bytes for its algorithm
    #[error("could not decode digest checksum: {0}")]
    InvalidChecksum(#[source] data_encoding::DecodeError),

    /// A digest could not be created because the wrong number of bytes
    /// were provided for the named algorithm
    #[error("invalid checksum length for {algorithm}: got {got} bytes, wanted {wanted}")]
    ChecksumLength {
        /// The algorithm tag that was being decoded
        algorithm: String,
        /// The number of bytes actually provided
        got: usize,
        /// The number of bytes the algorithm requires
        wanted: usize,
    },
}
