use std::sync::Arc;
use tokio::sync::RwLock;

/// Type alias for Arc<RwLock<T>>, a common pattern for shared mutable state
pub type RwArc<T> = Arc<RwLock<T>>;

/// Domain-separated SHA256 hash for cryptographic namespacing
///
/// Computes: H(domain || H(arg1 || arg2 || ...))
///
/// This prevents confusion between different hash purposes by prefixing
/// with a domain tag. The inner hash binds all context data together.
///
/// Usage:
/// ```ignore
/// let hash = sha256_namespaced!(
///     b"swap402.idempotency",
///     payer.as_bytes(),
///     url.as_bytes(),
///     &salt
/// );
/// ```
#[macro_export]
macro_rules! sha256_namespaced {
    ($domain:expr, $($data:expr),+ $(,)?) => {{
        use sha2::Digest;
        // First compute inner hash of all context/content data
        let mut inner = sha2::Sha256::new();
        $(
            inner.update($data);
        )+
        let inner_hash = inner.finalize();

        // Then compute outer hash with domain prefix
        let mut outer = sha2::Sha256::new();
        outer.update($domain);
        outer.update(&inner_hash);
        outer.finalize()
    }};
}

/// Separator byte placed between variable-length fields fed to
/// [`sha256_namespaced!`], so ("ab", "c") and ("a", "bc") hash differently.
pub const FIELD_SEPARATOR: &[u8] = &[0x1f];
