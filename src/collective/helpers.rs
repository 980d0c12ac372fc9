use super::bucket::Bucket;
use super::signature::Signature;
use crate::error::{OverlayError, Result};

/// Integer ceiling of log2(n). Returns 0 for n <= 1.
pub(crate) fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        return 0;
    }
    // For n > 1: ceil(log2(n)) = 32 - (n-1).leading_zeros()
    u32::BITS - (n - 1).leading_zeros()
}

/// Integer floor of log2(n). Returns 0 for n <= 1.
pub(crate) fn floor_log2(n: u32) -> u32 {
    if n <= 1 {
        return 0;
    }
    u32::BITS - 1 - n.leading_zeros()
}

/// Reject a bucket holding a contribution from outside `signature`.
pub(crate) fn check_contributors(signature: &Signature, bucket: &Bucket) -> Result<()> {
    match bucket.iter().find(|c| !signature.includes(c.rank)) {
        Some(c) => Err(OverlayError::violation(
            "allgather",
            format!("bucket carries rank {} outside {signature}", c.rank),
        )),
        None => Ok(()),
    }
}
