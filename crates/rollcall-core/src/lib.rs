//! rollcall-core — Face matching and QR token handling.
//!
//! Matches live face embeddings against registered ones by Euclidean
//! distance, and encrypts the lookup token that travels inside a QR code.

pub mod codec;
pub mod token;
pub mod types;

pub use codec::{CodecError, TokenCodec};
pub use token::{generate_lookup_token, LOOKUP_TOKEN_LEN};
pub use types::{
    Embedding, EuclideanMatcher, FaceCandidate, Identity, IdentityRecord, MatchResult, Matcher,
    DEFAULT_MATCH_THRESHOLD,
};
